//! Backend-neutral view of USB descriptors and EDL interface matching.

use crate::protocol::constants::{
    EDL_INTERFACE_CLASS, EDL_INTERFACE_PROTOCOLS, EDL_INTERFACE_SUBCLASS,
};

/// Endpoint transfer type, as far as matching cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Bulk,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSummary {
    pub address: u8,
    pub kind: EndpointKind,
    pub max_packet_size: usize,
}

impl EndpointSummary {
    pub fn is_in(&self) -> bool {
        self.address & 0x80 != 0
    }
}

/// One alternate setting of one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSummary {
    pub number: u8,
    pub alt_setting: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<EndpointSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interfaces: Vec<InterfaceSummary>,
}

/// The interface and endpoints that qualified a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceMatch {
    pub interface: u8,
    pub alt_setting: u8,
    pub in_endpoint: u8,
    pub out_endpoint: u8,
    pub in_max_packet_size: usize,
    pub out_max_packet_size: usize,
}

impl InterfaceSummary {
    fn is_vendor_specific(&self) -> bool {
        self.class == EDL_INTERFACE_CLASS
            && self.subclass == EDL_INTERFACE_SUBCLASS
            && EDL_INTERFACE_PROTOCOLS.contains(&self.protocol)
    }

    /// Match when vendor specific with exactly one bulk IN and one bulk OUT.
    pub fn qualify(&self) -> Option<InterfaceMatch> {
        if !self.is_vendor_specific() {
            return None;
        }

        let bulk = || self.endpoints.iter().filter(|ep| ep.kind == EndpointKind::Bulk);
        let mut ins = bulk().filter(|ep| ep.is_in());
        let mut outs = bulk().filter(|ep| !ep.is_in());

        let (in_ep, out_ep) = match (ins.next(), ins.next(), outs.next(), outs.next()) {
            (Some(i), None, Some(o), None) => (i, o),
            _ => return None,
        };

        Some(InterfaceMatch {
            interface: self.number,
            alt_setting: self.alt_setting,
            in_endpoint: in_ep.address,
            out_endpoint: out_ep.address,
            in_max_packet_size: in_ep.max_packet_size,
            out_max_packet_size: out_ep.max_packet_size,
        })
    }
}

impl DeviceSummary {
    pub fn find_interface(&self) -> Option<InterfaceMatch> {
        self.interfaces.iter().find_map(InterfaceSummary::qualify)
    }
}

impl AsRef<DeviceSummary> for DeviceSummary {
    fn as_ref(&self) -> &DeviceSummary {
        self
    }
}

/// Pick the first device with matching IDs and a qualifying interface.
///
/// Devices with the right IDs but no usable interface are skipped. The
/// iterator is consumed only up to the selected device.
pub fn select_candidate<I, D>(devices: I, vid: u16, pid: u16) -> Option<(D, InterfaceMatch)>
where
    I: IntoIterator<Item = D>,
    D: AsRef<DeviceSummary>,
{
    devices.into_iter().find_map(|d| {
        let summary = d.as_ref();
        if summary.vendor_id != vid || summary.product_id != pid {
            return None;
        }
        let matched = summary.find_interface()?;
        Some((d, matched))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{EDL_PRODUCT_ID, QUALCOMM_VENDOR_ID};

    fn bulk(address: u8) -> EndpointSummary {
        EndpointSummary {
            address,
            kind: EndpointKind::Bulk,
            max_packet_size: 512,
        }
    }

    fn edl_interface(protocol: u8, endpoints: Vec<EndpointSummary>) -> InterfaceSummary {
        InterfaceSummary {
            number: 0,
            alt_setting: 0,
            class: 0xFF,
            subclass: 0xFF,
            protocol,
            endpoints,
        }
    }

    fn device(vid: u16, pid: u16, interfaces: Vec<InterfaceSummary>) -> DeviceSummary {
        DeviceSummary {
            vendor_id: vid,
            product_id: pid,
            interfaces,
        }
    }

    #[test]
    fn test_second_device_selected() {
        let devices = vec![
            device(0x1D6B, 0x0002, vec![]),
            device(
                QUALCOMM_VENDOR_ID,
                EDL_PRODUCT_ID,
                vec![edl_interface(0xFF, vec![bulk(0x81), bulk(0x01)])],
            ),
        ];
        let (d, m) = select_candidate(&devices, QUALCOMM_VENDOR_ID, EDL_PRODUCT_ID).unwrap();
        assert!(std::ptr::eq(d, &devices[1]));
        assert_eq!(m.in_endpoint, 0x81);
        assert_eq!(m.out_endpoint, 0x01);
        assert_eq!(m.out_max_packet_size, 512);
    }

    #[test]
    fn test_protocol_0x10_accepted() {
        let d = device(
            QUALCOMM_VENDOR_ID,
            EDL_PRODUCT_ID,
            vec![edl_interface(0x10, vec![bulk(0x01), bulk(0x82)])],
        );
        assert!(d.find_interface().is_some());
    }

    #[test]
    fn test_matching_ids_without_interface_skipped() {
        let devices = vec![
            device(
                QUALCOMM_VENDOR_ID,
                EDL_PRODUCT_ID,
                vec![edl_interface(0x30, vec![bulk(0x81), bulk(0x01)])],
            ),
            device(
                QUALCOMM_VENDOR_ID,
                EDL_PRODUCT_ID,
                vec![edl_interface(0xFF, vec![bulk(0x81)])],
            ),
        ];
        assert!(select_candidate(&devices, QUALCOMM_VENDOR_ID, EDL_PRODUCT_ID).is_none());
    }

    #[test]
    fn test_extra_bulk_endpoint_rejected() {
        let iface = edl_interface(0xFF, vec![bulk(0x81), bulk(0x01), bulk(0x02)]);
        assert!(iface.qualify().is_none());
    }

    #[test]
    fn test_interrupt_endpoint_ignored() {
        let mut endpoints = vec![bulk(0x81), bulk(0x01)];
        endpoints.push(EndpointSummary {
            address: 0x83,
            kind: EndpointKind::Other,
            max_packet_size: 8,
        });
        assert!(edl_interface(0xFF, endpoints).qualify().is_some());
    }

    #[test]
    fn test_selection_stops_at_first_match() {
        let edl = || {
            device(
                QUALCOMM_VENDOR_ID,
                EDL_PRODUCT_ID,
                vec![edl_interface(0xFF, vec![bulk(0x81), bulk(0x01)])],
            )
        };
        let mut probed = 0;
        let devices = (0..3).map(|_| {
            probed += 1;
            edl()
        });
        let (d, _) = select_candidate(devices, QUALCOMM_VENDOR_ID, EDL_PRODUCT_ID).unwrap();
        assert_eq!(d, edl());
        assert_eq!(probed, 1);
    }
}
