use super::auth::{
    AuthToken, AuthTokenValue, GateHasher, UserAuthCredentials, UsernamePasswordCredentials,
};
use super::user_store::UserStore;
use anyhow::{bail, Context, Result};
use std::{
    sync::{Arc, Mutex},
    time::SystemTime,
};

pub struct UserManager {
    user_store: Arc<Mutex<Box<dyn UserStore>>>,
}

impl UserManager {
    pub fn new(user_store: Box<dyn UserStore>) -> Self {
        Self {
            user_store: Arc::new(Mutex::new(user_store)),
        }
    }

    pub fn add_user<T: AsRef<str>>(&self, user_handle: T) -> Result<usize> {
        let locked_store = self.user_store.lock().unwrap();

        if user_handle.as_ref().is_empty() {
            bail!("The user handle cannot be empty.")
        }

        if locked_store.get_user_id(user_handle.as_ref())?.is_some() {
            bail!("User handle already exists.");
        }

        locked_store.create_user(user_handle.as_ref())
    }

    pub fn get_all_user_handles(&self) -> Result<Vec<String>> {
        self.user_store.lock().unwrap().get_all_user_handles()
    }

    pub fn get_user_credentials(&self, user_handle: &str) -> Option<UserAuthCredentials> {
        self.user_store
            .lock()
            .unwrap()
            .get_user_auth_credentials(user_handle)
            .ok()
            .flatten()
    }

    pub fn get_auth_token(&self, value: &AuthTokenValue) -> Option<AuthToken> {
        self.user_store
            .lock()
            .unwrap()
            .get_user_auth_token(value)
            .ok()
            .flatten()
    }

    pub fn touch_auth_token(&self, value: &AuthTokenValue) -> Result<()> {
        self.user_store
            .lock()
            .unwrap()
            .update_user_auth_token_last_used_timestamp(value)
    }

    pub fn generate_auth_token(&mut self, credentials: &UserAuthCredentials) -> Result<AuthToken> {
        let token = AuthToken {
            user_id: credentials.user_id,
            value: AuthTokenValue::generate(),
            created: SystemTime::now(),
            last_used: None,
        };
        self.user_store
            .lock()
            .unwrap()
            .add_user_auth_token(token.clone())?;
        Ok(token)
    }

    pub fn delete_auth_token(&mut self, user_id: usize, value: &AuthTokenValue) -> Result<()> {
        let locked_store = self.user_store.lock().unwrap();
        match locked_store.get_user_auth_token(value)? {
            Some(token) if token.user_id == user_id => {
                locked_store.delete_user_auth_token(value)?;
                Ok(())
            }
            Some(_) => bail!("The token does not belong to the user."),
            None => bail!("No such token."),
        }
    }

    fn create_hashed_password(
        user_id: usize,
        password: String,
    ) -> Result<UsernamePasswordCredentials> {
        let hasher = GateHasher::Argon2;
        let salt = hasher.generate_b64_salt();
        let hash = hasher.hash(password.as_bytes(), &salt)?;
        Ok(UsernamePasswordCredentials {
            user_id,
            salt,
            hash,
            hasher,
            created: SystemTime::now(),
            last_tried: None,
            last_used: None,
        })
    }

    pub fn create_password_credentials(&mut self, user_handle: &str, password: String) -> Result<()> {
        let user_store = self.user_store.lock().unwrap();

        let credentials = user_store
            .get_user_auth_credentials(user_handle)?
            .with_context(|| format!("User with handle {} not found.", user_handle))?;
        if credentials.username_password.is_some() {
            bail!(
                "User with handle {} already has password credentials. Maybe you want to modify them?",
                user_handle
            );
        }

        user_store.update_user_auth_credentials(UserAuthCredentials {
            user_id: credentials.user_id,
            username_password: Some(Self::create_hashed_password(credentials.user_id, password)?),
        })
    }

    pub fn update_password_credentials(&mut self, user_handle: &str, password: String) -> Result<()> {
        let user_store = self.user_store.lock().unwrap();

        let credentials = user_store
            .get_user_auth_credentials(user_handle)?
            .with_context(|| format!("User with handle {} not found.", user_handle))?;
        if credentials.username_password.is_none() {
            bail!(
                "User with handle {} has no password credentials to update.",
                user_handle
            );
        }

        user_store.update_user_auth_credentials(UserAuthCredentials {
            user_id: credentials.user_id,
            username_password: Some(Self::create_hashed_password(credentials.user_id, password)?),
        })
    }

    pub fn delete_password_credentials(&mut self, user_handle: &str) -> Result<()> {
        let user_store = self.user_store.lock().unwrap();

        let credentials = user_store
            .get_user_auth_credentials(user_handle)?
            .with_context(|| format!("User with handle {} not found.", user_handle))?;

        user_store.delete_user_auth_credentials(credentials.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::SqliteUserStore;
    use tempfile::TempDir;

    fn create_tmp_manager() -> (UserManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteUserStore::new(temp_dir.path().join("user.db")).unwrap();
        (UserManager::new(Box::new(store)), temp_dir)
    }

    #[test]
    fn adds_users_and_rejects_duplicates() {
        let (manager, _temp_dir) = create_tmp_manager();

        manager.add_user("alice").unwrap();
        assert!(manager.add_user("alice").is_err());
        assert!(manager.add_user("").is_err());
        assert_eq!(manager.get_all_user_handles().unwrap(), vec!["alice"]);
    }

    #[test]
    fn password_credentials_lifecycle() {
        let (mut manager, _temp_dir) = create_tmp_manager();
        manager.add_user("alice").unwrap();

        assert!(manager
            .create_password_credentials("nobody", "pw".to_owned())
            .is_err());

        manager
            .create_password_credentials("alice", "pw".to_owned())
            .unwrap();
        assert!(manager
            .create_password_credentials("alice", "other".to_owned())
            .is_err());

        let credentials = manager.get_user_credentials("alice").unwrap();
        let password = credentials.username_password.as_ref().unwrap();
        assert!(password.hasher.verify("pw", &password.hash).unwrap());

        manager
            .update_password_credentials("alice", "newpw".to_owned())
            .unwrap();
        let credentials = manager.get_user_credentials("alice").unwrap();
        let password = credentials.username_password.as_ref().unwrap();
        assert!(password.hasher.verify("newpw", &password.hash).unwrap());
        assert!(!password.hasher.verify("pw", &password.hash).unwrap());

        manager.delete_password_credentials("alice").unwrap();
        let credentials = manager.get_user_credentials("alice").unwrap();
        assert!(credentials.username_password.is_none());
    }

    #[test]
    fn auth_token_lifecycle() {
        let (mut manager, _temp_dir) = create_tmp_manager();
        manager.add_user("alice").unwrap();

        let credentials = manager.get_user_credentials("alice").unwrap();
        let token = manager.generate_auth_token(&credentials).unwrap();

        let loaded = manager.get_auth_token(&token.value).unwrap();
        assert_eq!(loaded.user_id, credentials.user_id);

        manager.touch_auth_token(&token.value).unwrap();
        assert!(manager
            .get_auth_token(&token.value)
            .unwrap()
            .last_used
            .is_some());

        assert!(manager.delete_auth_token(99, &token.value).is_err());
        manager
            .delete_auth_token(credentials.user_id, &token.value)
            .unwrap();
        assert!(manager.get_auth_token(&token.value).is_none());
    }
}
