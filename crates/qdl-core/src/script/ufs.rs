//! UFS provisioning scripts.
//!
//! A provisioning script is a `<data>` document of `<ufs>` elements: one
//! common configuration, one body per logical unit and an epilogue carrying
//! the `commit` attribute. Attributes are passed to the device unchanged.

use std::path::Path;

use tracing::{debug, warn};

use super::ScriptError;
use super::xml::{Document, Element};
use crate::error::QdlError;

#[derive(Debug, Clone, Default)]
pub struct UfsPlan {
    /// Configuration elements in document order.
    elements: Vec<Element>,
    /// The element that makes the layout permanent.
    commit: Option<Element>,
}

impl UfsPlan {
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        Self::from_document(&Document::load(path)?)
    }

    pub fn from_document(doc: &Document) -> Result<Self, ScriptError> {
        doc.expect_root("data", "ufs")?;
        let mut plan = Self::default();
        for el in doc.elements("ufs") {
            if el.attributes.is_empty() {
                return Err(ScriptError::Parse {
                    path: doc.path.clone(),
                    message: "<ufs> element without attributes".into(),
                });
            }
            if el.attr("commit").is_some() {
                if plan.commit.is_some() {
                    return Err(ScriptError::Parse {
                        path: doc.path.clone(),
                        message: "more than one <ufs commit=...> element".into(),
                    });
                }
                plan.commit = Some(el.clone());
            } else {
                plan.elements.push(el.clone());
            }
        }
        debug!(
            path = %doc.path.display(),
            elements = plan.elements.len(),
            commit = plan.commit.is_some(),
            "Loaded UFS provisioning"
        );
        Ok(plan)
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn has_commit(&self) -> bool {
        self.commit.is_some()
    }

    /// Send each element; the commit element only when `finalize` is set.
    pub fn execute<F>(&self, finalize: bool, mut apply: F) -> Result<usize, QdlError>
    where
        F: FnMut(&Element) -> Result<(), QdlError>,
    {
        let mut sent = 0;
        for el in &self.elements {
            apply(el)?;
            sent += 1;
        }
        match (&self.commit, finalize) {
            (Some(commit), true) => {
                apply(commit)?;
                sent += 1;
            }
            (Some(_), false) => {
                warn!("UFS layout not committed, pass --finalize-provisioning to make it permanent")
            }
            (None, _) => {}
        }
        Ok(sent)
    }
}
