use rapk_toolchain::{android, SigningKey, ToolLocator};

use crate::{error::BuildError, layout::ForgeLayout, templates::TemplateStore};

/// Everything a pipeline needs besides the request itself. Shared by all
/// pipelines and all jobs.
#[derive(Debug)]
pub struct BuildContext {
    layout: ForgeLayout,
    locator: ToolLocator,
    signing: SigningKey,
    templates: TemplateStore,
    verify_output: bool,
}

impl BuildContext {
    pub fn new(layout: ForgeLayout) -> Self {
        Self {
            locator: layout.locator(),
            signing: layout.signing_key(),
            templates: TemplateStore::new(layout.clone()),
            layout,
            verify_output: false,
        }
    }

    /// Re-check alignment and signature of every artifact before publishing it.
    pub fn with_verification(mut self, verify_output: bool) -> Self {
        self.verify_output = verify_output;
        self
    }

    pub fn layout(&self) -> &ForgeLayout {
        &self.layout
    }

    pub fn locator(&self) -> &ToolLocator {
        &self.locator
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn verify_output(&self) -> bool {
        self.verify_output
    }

    /// Fails before any job state is touched when the align/sign stage could
    /// not possibly succeed.
    pub(crate) fn check_signing_inputs(&self) -> Result<(), BuildError> {
        self.locator.require_build_tool(android::ZIPALIGN)?;
        self.locator.require_build_tool(android::APKSIGNER)?;
        if !self.signing.keystore.is_file() {
            return Err(BuildError::MissingInput(format!(
                "signing keystore {}",
                self.signing.keystore.display()
            )));
        }
        Ok(())
    }
}
