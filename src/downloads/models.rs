use serde::{Deserialize, Serialize};

/// A single download declaration, as produced by the authoring layer when a
/// page is saved. The templating side hands these over already parsed; raw
/// markup never reaches this crate.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Declaration {
    /// Filesystem path or URL of the real file. Empty means the author left
    /// the attribute out.
    #[serde(default)]
    pub file: String,

    /// Element id, passed through to the rendered anchor.
    #[serde(default)]
    pub id: String,

    /// Inline style, passed through to the rendered anchor.
    #[serde(default)]
    pub style: String,

    /// CSS class, passed through to the rendered anchor.
    #[serde(default)]
    pub class: String,

    /// Anchor text.
    #[serde(default = "default_label")]
    pub label: String,

    /// Whether a session is required to download the file.
    #[serde(default = "default_true")]
    pub login_required: bool,

    /// Whether the link should hide the file name behind a digest.
    #[serde(default)]
    pub opaque: bool,

    /// Delay in milliseconds after which the page should start the download
    /// on its own. Zero disables auto-download.
    #[serde(default)]
    pub auto_download_delay_ms: u64,
}

fn default_label() -> String {
    "Download".to_owned()
}

fn default_true() -> bool {
    true
}

impl Declaration {
    pub fn for_file<T: AsRef<str>>(file: T) -> Declaration {
        Declaration {
            file: file.as_ref().to_owned(),
            id: String::new(),
            style: String::new(),
            class: String::new(),
            label: default_label(),
            login_required: true,
            opaque: false,
            auto_download_delay_ms: 0,
        }
    }
}

/// The persisted mapping behind a download token. Looked up on every request
/// to the download route; written only when content is saved.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DownloadRecord {
    pub token: String,
    pub source_path: String,
    pub login_required: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declaration_defaults() {
        let declaration: Declaration = serde_json::from_str(r#"{"file": "/srv/a.pdf"}"#).unwrap();
        assert_eq!(declaration.file, "/srv/a.pdf");
        assert_eq!(declaration.label, "Download");
        assert!(declaration.login_required);
        assert!(!declaration.opaque);
        assert_eq!(declaration.auto_download_delay_ms, 0);
    }

    #[test]
    fn declaration_overrides() {
        let declaration: Declaration = serde_json::from_str(
            r#"{"file": "/srv/a.zip", "login_required": false, "opaque": true, "id": "dl"}"#,
        )
        .unwrap();
        assert!(!declaration.login_required);
        assert!(declaration.opaque);
        assert_eq!(declaration.id, "dl");
    }
}
