//! WebDAV 用户与权限存储。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// 路径权限令牌，名称与 WebDAV 客户端配置保持一致。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Privilege {
    #[serde(rename = "all")]
    All,
    #[serde(rename = "canRead")]
    CanRead,
    #[serde(rename = "canReadLocks")]
    CanReadLocks,
    #[serde(rename = "canReadContent")]
    CanReadContent,
    #[serde(rename = "canReadProperties")]
    CanReadProperties,
    #[serde(rename = "canReadContentTranslated")]
    CanReadContentTranslated,
    #[serde(rename = "canReadContentSource")]
    CanReadContentSource,
    #[serde(rename = "canWrite")]
    CanWrite,
    #[serde(rename = "canWriteLocks")]
    CanWriteLocks,
    #[serde(rename = "canWriteContent")]
    CanWriteContent,
    #[serde(rename = "canWriteProperties")]
    CanWriteProperties,
    #[serde(rename = "canWriteContentTranslated")]
    CanWriteContentTranslated,
    #[serde(rename = "canWriteContentSource")]
    CanWriteContentSource,
}

const READ_GRANTS: [Privilege; 5] = [
    Privilege::CanReadLocks,
    Privilege::CanReadContent,
    Privilege::CanReadProperties,
    Privilege::CanReadContentTranslated,
    Privilege::CanReadContentSource,
];

const WRITE_GRANTS: [Privilege; 5] = [
    Privilege::CanWriteLocks,
    Privilege::CanWriteContent,
    Privilege::CanWriteProperties,
    Privilege::CanWriteContentTranslated,
    Privilege::CanWriteContentSource,
];

/// 展开聚合权限：`canRead` / `canWrite` 追加对应的细粒度权限。
///
/// 只增不减，调用方传入的权限原样保留。
pub fn expand_rights(rights: &[Privilege]) -> BTreeSet<Privilege> {
    let mut expanded: BTreeSet<Privilege> = rights.iter().copied().collect();
    if rights.contains(&Privilege::CanRead) {
        expanded.extend(READ_GRANTS);
    }
    if rights.contains(&Privilege::CanWrite) {
        expanded.extend(WRITE_GRANTS);
    }
    expanded
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub password: String,
    pub root_path: String,
    pub rights: BTreeSet<Privilege>,
    pub is_admin: bool,
}

impl User {
    /// 判断用户是否拥有指定权限（`all` 与管理员视为拥有全部权限）。
    pub fn can(&self, privilege: Privilege) -> bool {
        self.is_admin || self.rights.contains(&Privilege::All) || self.rights.contains(&privilege)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserMutation {
    Add,
    Modify,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UserStoreError {
    #[error("添加用户失败")]
    AddFailed,
    #[error("修改用户失败")]
    ModifyFailed,
    #[error("重复添加用户")]
    Duplicate(String),
    #[error("用户不存在")]
    NotFound(String),
    #[error("用户配置读取失败: {0}")]
    Load(String),
}

/// 用户配置文件中的单条记录。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub username: String,
    pub password: String,
    #[serde(default = "default_root_path")]
    pub root_path: String,
    #[serde(default)]
    pub rights: Vec<Privilege>,
    #[serde(default)]
    pub is_admin: bool,
}

fn default_root_path() -> String {
    "/".to_string()
}

#[derive(Debug, Default)]
pub struct UserStore {
    users: RwLock<HashMap<String, Arc<User>>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新增或修改用户，失败时不产生任何部分修改。
    pub async fn set_user(
        &self,
        username: &str,
        password: &str,
        root_path: &str,
        rights: &[Privilege],
        mode: UserMutation,
        is_admin: bool,
    ) -> Result<(), UserStoreError> {
        if username.is_empty() || password.is_empty() {
            return Err(match mode {
                UserMutation::Add => UserStoreError::AddFailed,
                UserMutation::Modify => UserStoreError::ModifyFailed,
            });
        }

        let mut users = self.users.write().await;
        match (mode, users.contains_key(username)) {
            (UserMutation::Add, true) => {
                warn!(username, "duplicate user rejected");
                return Err(UserStoreError::Duplicate(username.to_string()));
            }
            (UserMutation::Modify, false) => {
                warn!(username, "modify of unknown user rejected");
                return Err(UserStoreError::NotFound(username.to_string()));
            }
            _ => {}
        }

        let user = User {
            username: username.to_string(),
            password: password.to_string(),
            root_path: normalize_root(root_path),
            rights: expand_rights(rights),
            is_admin,
        };
        users.insert(user.username.clone(), Arc::new(user));
        info!(username, ?mode, "user stored");
        Ok(())
    }

    pub async fn get_user(&self, username: &str) -> Option<Arc<User>> {
        self.users.read().await.get(username).cloned()
    }

    pub async fn all_users(&self) -> Vec<Arc<User>> {
        let mut users: Vec<_> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    pub async fn del_user(&self, username: &str) -> bool {
        self.users.write().await.remove(username).is_some()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    /// 校验用户名与密码，成功返回用户。
    pub async fn authenticate(&self, username: &str, password: &str) -> Option<Arc<User>> {
        let user = self.get_user(username).await?;
        (user.password == password).then_some(user)
    }

    /// 从 JSON 文件批量加载用户（数组格式）。
    pub async fn load_file(&self, path: &Path) -> Result<usize, UserStoreError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|err| UserStoreError::Load(err.to_string()))?;
        let records: Vec<UserRecord> =
            serde_json::from_slice(&raw).map_err(|err| UserStoreError::Load(err.to_string()))?;
        let count = records.len();
        for record in records {
            self.set_user(
                &record.username,
                &record.password,
                &record.root_path,
                &record.rights,
                UserMutation::Add,
                record.is_admin,
            )
            .await?;
        }
        Ok(count)
    }
}

fn normalize_root(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn can_read_expands_to_read_family() {
        let rights = expand_rights(&[Privilege::CanRead]);
        for expected in [
            Privilege::CanRead,
            Privilege::CanReadLocks,
            Privilege::CanReadContent,
            Privilege::CanReadProperties,
            Privilege::CanReadContentTranslated,
            Privilege::CanReadContentSource,
        ] {
            assert!(rights.contains(&expected), "missing {expected:?}");
        }
        assert!(!rights.contains(&Privilege::CanWriteContent));
    }

    #[test]
    fn expansion_matches_first_position() {
        let rights = expand_rights(&[Privilege::CanWrite, Privilege::CanReadLocks]);
        assert!(rights.contains(&Privilege::CanWriteContentSource));
        assert!(rights.contains(&Privilege::CanReadLocks));
        assert!(!rights.contains(&Privilege::CanReadContent));
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected_without_mutation() {
        let store = UserStore::new();
        store
            .set_user("alice", "pw1", "/", &[Privilege::CanRead], UserMutation::Add, false)
            .await
            .expect("first add");
        let result = store
            .set_user("alice", "pw2", "/other", &[Privilege::All], UserMutation::Add, true)
            .await;

        assert_eq!(result, Err(UserStoreError::Duplicate("alice".into())));
        assert_eq!(store.all_users().await.len(), 1);
        let user = store.get_user("alice").await.expect("user");
        assert_eq!(user.password, "pw1");
        assert!(!user.is_admin);
    }

    #[tokio::test]
    async fn modify_of_missing_user_is_rejected() {
        let store = UserStore::new();
        let result = store
            .set_user("bob", "pw", "/", &[], UserMutation::Modify, false)
            .await;
        assert_eq!(result, Err(UserStoreError::NotFound("bob".into())));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn modify_replaces_existing_record() {
        let store = UserStore::new();
        store
            .set_user("carol", "pw", "/", &[Privilege::CanRead], UserMutation::Add, false)
            .await
            .expect("add");
        store
            .set_user("carol", "new", "Movies/", &[Privilege::CanWrite], UserMutation::Modify, false)
            .await
            .expect("modify");

        let user = store.authenticate("carol", "new").await.expect("auth");
        assert_eq!(user.root_path, "/Movies");
        assert!(user.can(Privilege::CanWriteContent));
        assert!(!user.can(Privilege::CanReadContent));
        assert!(store.authenticate("carol", "pw").await.is_none());
    }

    #[tokio::test]
    async fn empty_credentials_are_rejected() {
        let store = UserStore::new();
        let result = store.set_user("", "pw", "/", &[], UserMutation::Add, false).await;
        assert_eq!(result, Err(UserStoreError::AddFailed));
    }

    #[tokio::test]
    async fn load_file_reads_camel_case_records() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("users.json");
        std::fs::write(
            &path,
            r#"[{"username":"dave","password":"pw","rootPath":"/TV","rights":["canRead"]},
                {"username":"root","password":"pw","isAdmin":true}]"#,
        )
        .expect("write users");

        let store = UserStore::new();
        let count = store.load_file(&path).await.expect("load");
        assert_eq!(count, 2);
        let dave = store.get_user("dave").await.expect("dave");
        assert!(dave.can(Privilege::CanReadProperties));
        let root = store.get_user("root").await.expect("root");
        assert!(root.can(Privilege::CanWrite));
    }
}
