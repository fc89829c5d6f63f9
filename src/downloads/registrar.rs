use std::sync::Arc;

use tracing::{debug, error};

use super::models::{Declaration, DownloadRecord};
use super::store::{DownloadRecordStore, DownloadStore};
use super::token::{derive_token, TokenSecret};

/// The write path of the download feature: turns the declarations found in a
/// saved page into persisted records, keyed by the same tokens the rendered
/// links will carry.
///
/// Runs once per content-save event, never on page views; reads only ever
/// hit the store. Declarations removed from a page leave their records
/// behind, which is harmless since tokens are addressed by source path.
pub struct Registrar {
    store: Arc<dyn DownloadStore>,
    secret: TokenSecret,
}

impl Registrar {
    pub fn new(store: Arc<dyn DownloadStore>, secret: TokenSecret) -> Registrar {
        Registrar { store, secret }
    }

    /// Registers every declaration in a saved page. A declaration with no
    /// file is skipped silently, and a store failure on one declaration does
    /// not abort the others. Returns the number of records written.
    pub fn register(&self, declarations: &[Declaration]) -> usize {
        let mut written = 0;
        for declaration in declarations {
            if declaration.file.is_empty() {
                debug!("Skipping declaration with no file");
                continue;
            }

            let record = DownloadRecord {
                token: derive_token(&declaration.file, declaration.opaque, &self.secret),
                source_path: declaration.file.clone(),
                login_required: declaration.login_required,
            };

            match self.store.upsert_record(&record) {
                Ok(()) => written += 1,
                Err(err) => error!(
                    "Failed to register download record for {}: {}",
                    declaration.file, err
                ),
            }
        }
        written
    }

    /// The secret the registrar salts opaque tokens with. Rendering shares
    /// it so rendered links match registered records.
    pub fn token_secret(&self) -> &TokenSecret {
        &self.secret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloads::{DownloadCounterStore, SqliteDownloadStore};
    use tempfile::TempDir;

    fn create_tmp_registrar() -> (Registrar, Arc<dyn DownloadStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn DownloadStore> =
            Arc::new(SqliteDownloadStore::new(temp_dir.path().join("downloads.db")).unwrap());
        let registrar = Registrar::new(store.clone(), TokenSecret::new("fixed-test-secret"));
        (registrar, store, temp_dir)
    }

    #[test]
    fn registers_declarations_and_round_trips_records() {
        let (registrar, store, _temp_dir) = create_tmp_registrar();

        let declaration = Declaration {
            login_required: false,
            ..Declaration::for_file("/srv/docs/report.pdf")
        };
        assert_eq!(registrar.register(&[declaration]), 1);

        let record = store.get_record("report.pdf").unwrap().unwrap();
        assert_eq!(record.source_path, "/srv/docs/report.pdf");
        assert!(!record.login_required);
    }

    #[test]
    fn registration_token_matches_render_token() {
        let (registrar, store, _temp_dir) = create_tmp_registrar();

        let declaration = Declaration {
            opaque: true,
            ..Declaration::for_file("/srv/docs/secret.zip")
        };
        registrar.register(std::slice::from_ref(&declaration));

        let rendered_token = derive_token(
            &declaration.file,
            declaration.opaque,
            &TokenSecret::new("fixed-test-secret"),
        );
        assert!(store.get_record(&rendered_token).unwrap().is_some());
    }

    #[test]
    fn skips_empty_files_without_aborting_the_rest() {
        let (registrar, store, _temp_dir) = create_tmp_registrar();

        let declarations = vec![
            Declaration::for_file(""),
            Declaration::for_file("/srv/docs/b.pdf"),
        ];
        assert_eq!(registrar.register(&declarations), 1);
        assert!(store.get_record("b.pdf").unwrap().is_some());
    }

    #[test]
    fn redeclaring_overwrites_the_record() {
        let (registrar, store, _temp_dir) = create_tmp_registrar();

        registrar.register(&[Declaration::for_file("/srv/docs/a.pdf")]);
        registrar.register(&[Declaration {
            login_required: false,
            ..Declaration::for_file("/srv/docs/a.pdf")
        }]);

        let record = store.get_record("a.pdf").unwrap().unwrap();
        assert!(!record.login_required);
    }

    #[test]
    fn no_declarations_writes_nothing() {
        let (registrar, store, _temp_dir) = create_tmp_registrar();
        assert_eq!(registrar.register(&[]), 0);
        assert!(store.get_all_counts().unwrap().is_empty());
    }
}
