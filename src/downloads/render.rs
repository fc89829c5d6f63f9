use thiserror::Error;

use super::models::Declaration;
use super::token::{derive_token, TokenSecret};

/// Problems a declaration can have at render time. These never abort the
/// page: the caller swaps the link for [`RenderError::inline_markup`] and
/// keeps going with the remaining declarations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("no file was provided for the download link")]
    EmptyFile,
    #[error("auto-download requires the declaration to carry an id")]
    AutoDownloadWithoutId,
}

impl RenderError {
    /// Error markup shown in place of the link, bold like the rest of the
    /// authored page would render it.
    pub fn inline_markup(&self) -> String {
        format!("<b>Download link error: {}.</b>", self)
    }
}

/// Renders a declaration into its anchor markup. The href token comes from
/// [`derive_token`], the same derivation the registrar uses when the page is
/// saved, so a rendered link always points at a registered record.
pub fn render_download_link(
    declaration: &Declaration,
    route_prefix: &str,
    secret: &TokenSecret,
) -> Result<String, RenderError> {
    if declaration.file.is_empty() {
        return Err(RenderError::EmptyFile);
    }
    if declaration.auto_download_delay_ms > 0 && declaration.id.is_empty() {
        return Err(RenderError::AutoDownloadWithoutId);
    }

    let token = derive_token(&declaration.file, declaration.opaque, secret);

    let mut attributes = String::new();
    if !declaration.id.is_empty() {
        attributes.push_str(&format!(" id='{}'", declaration.id));
    }
    if !declaration.class.is_empty() {
        attributes.push_str(&format!(" class='{}'", declaration.class));
    }
    if !declaration.style.is_empty() {
        attributes.push_str(&format!(" style='{}'", declaration.style));
    }

    let mut markup = format!(
        "<a{} href=\"/{}/{}\">{}</a>",
        attributes, route_prefix, token, declaration.label
    );

    if declaration.auto_download_delay_ms > 0 {
        markup.push_str(&format!(
            "<script>window.setTimeout(function(){{location.href = document.getElementById(\"{}\").href;}}, {});</script>",
            declaration.id, declaration.auto_download_delay_ms
        ));
    }

    Ok(markup)
}
