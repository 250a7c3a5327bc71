//! Deploy keys: SSH public keys bound to a single repository.
//!
//! A public key row can back deploy keys on several repositories. It is
//! created on first use and removed once the last deploy key referencing it
//! is gone.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{Error, Result};
use crate::state::AppState;
use crate::store::keys::{
    count_deploy_keys_for_key, delete_deploy_key_row, delete_public_key, get_deploy_key_by_id,
    get_public_key_by_fingerprint, has_deploy_key, insert_deploy_key, insert_public_key,
    is_deploy_key_name_used,
};
use crate::store::repo::must_get_repository;
use crate::store::timestamp_now;
use crate::store::user::is_user_repo_admin;
use crate::types::{AccessMode, DeployKey, KeyType, PublicKey, User};

const KEY_TYPES: &[&str] = &[
    "ssh-rsa",
    "ssh-dss",
    "ssh-ed25519",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "sk-ecdsa-sha2-nistp256@openssh.com",
    "sk-ssh-ed25519@openssh.com",
];

/// A parsed `authorized_keys` style line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub key_type: String,
    /// `<type> <base64>` with the comment stripped.
    pub content: String,
    pub fingerprint: String,
}

/// Parses `<type> <base64> [comment]` and computes the OpenSSH
/// `SHA256:` fingerprint of the decoded blob.
pub fn parse_public_key(raw: &str) -> Result<ParsedKey> {
    let mut fields = raw.split_whitespace();
    let (Some(key_type), Some(encoded)) = (fields.next(), fields.next()) else {
        return Err(Error::InvalidPublicKey("expected '<type> <key>'".to_string()));
    };
    if !KEY_TYPES.contains(&key_type) {
        return Err(Error::InvalidPublicKey(format!("unsupported key type '{key_type}'")));
    }

    let blob = STANDARD
        .decode(encoded)
        .map_err(|e| Error::InvalidPublicKey(format!("invalid base64: {e}")))?;

    // The blob starts with the length-prefixed key type.
    let embedded = blob
        .get(..4)
        .map(|len| u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize)
        .and_then(|len| blob.get(4..4 + len));
    if embedded != Some(key_type.as_bytes()) {
        return Err(Error::InvalidPublicKey(format!(
            "key data does not match type '{key_type}'"
        )));
    }

    let digest = Sha256::digest(&blob);
    Ok(ParsedKey {
        key_type: key_type.to_string(),
        content: format!("{key_type} {encoded}"),
        fingerprint: format!("SHA256:{}", STANDARD_NO_PAD.encode(digest)),
    })
}

/// Adds a deploy key to `repo_id`, reusing an existing deploy-type public
/// key with the same fingerprint.
pub fn add_deploy_key(
    state: &AppState,
    repo_id: i64,
    name: &str,
    content: &str,
    read_only: bool,
) -> Result<DeployKey> {
    let parsed = parse_public_key(content)?;
    let mode = if read_only {
        AccessMode::Read
    } else {
        AccessMode::Write
    };
    let now = timestamp_now();

    let session = state.store.begin()?;
    must_get_repository(&session, repo_id)?;

    let public_key = match get_public_key_by_fingerprint(&session, &parsed.fingerprint)? {
        Some(existing) => {
            if existing.key_type != KeyType::Deploy {
                return Err(Error::KeyAlreadyExist(parsed.fingerprint));
            }
            if has_deploy_key(&session, existing.id, repo_id)? {
                return Err(Error::DeployKeyAlreadyExist {
                    key_id: existing.id,
                    repo_id,
                });
            }
            existing
        }
        None => {
            let mut key = PublicKey {
                id: 0,
                owner_id: 0,
                name: name.to_string(),
                fingerprint: parsed.fingerprint.clone(),
                content: parsed.content,
                mode,
                key_type: KeyType::Deploy,
                created_unix: now,
            };
            insert_public_key(&session, &mut key)?;
            key
        }
    };

    if is_deploy_key_name_used(&session, repo_id, name)? {
        return Err(Error::DeployKeyNameAlreadyUsed {
            repo_id,
            name: name.to_string(),
        });
    }

    let mut deploy_key = DeployKey {
        id: 0,
        key_id: public_key.id,
        repo_id,
        name: name.to_string(),
        fingerprint: public_key.fingerprint,
        mode,
        created_unix: now,
    };
    insert_deploy_key(&session, &mut deploy_key)?;
    session.commit()?;

    info!(repo_id, key_id = deploy_key.key_id, name, "Added deploy key");
    Ok(deploy_key)
}

/// Deletes a deploy key inside an open session. Site admins may delete any
/// key; everyone else needs admin access to the key's repository.
pub(crate) fn delete_deploy_key_in(conn: &Connection, doer: &User, id: i64) -> Result<()> {
    let key = get_deploy_key_by_id(conn, id)?.ok_or(Error::DeployKeyNotExist(id))?;

    if !doer.is_admin {
        let repo = must_get_repository(conn, key.repo_id)?;
        if !is_user_repo_admin(conn, &repo, doer)? {
            return Err(Error::KeyAccessDenied {
                user_id: doer.id,
                key_id: key.id,
            });
        }
    }

    delete_deploy_key_row(conn, key.id)?;
    if count_deploy_keys_for_key(conn, key.key_id)? == 0 {
        delete_public_key(conn, key.key_id)?;
    }
    Ok(())
}

pub fn delete_deploy_key(state: &AppState, doer: &User, id: i64) -> Result<()> {
    let session = state.store.begin()?;
    delete_deploy_key_in(&session, doer, id)?;
    session.commit()?;
    info!(id, doer = %doer.name, "Deleted deploy key");
    Ok(())
}

pub fn list_deploy_keys(state: &AppState, repo_id: i64) -> Result<Vec<DeployKey>> {
    let conn = state.store.connection();
    crate::store::keys::list_deploy_keys(&conn, repo_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{CreateRepoOptions, create_repository};
    use crate::state::test_support::{test_env, user};
    use crate::types::Repository;

    const KEY_A: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8g ci@host";
    const KEY_B: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAIDBAUGBwgJCgsMDQ4PEBESExQVFhcYGRobHB0eHyAh";

    fn repo(state: &AppState, owner: &User, name: &str) -> Repository {
        create_repository(
            state,
            owner,
            owner,
            CreateRepoOptions {
                name: name.to_string(),
                ..CreateRepoOptions::default()
            },
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_public_key_fingerprint() {
        let parsed = parse_public_key(KEY_A).unwrap();
        assert_eq!(parsed.key_type, "ssh-ed25519");
        assert_eq!(parsed.fingerprint, "SHA256:mKqU+0K8OhKmA8bBQi9Rz0Q5l7/g160hIP+rJYSTNj4");
        assert!(!parsed.content.contains("ci@host"));
    }

    #[test]
    fn test_parse_public_key_rejects_garbage() {
        assert!(matches!(parse_public_key("ssh-ed25519"), Err(Error::InvalidPublicKey(_))));
        assert!(matches!(parse_public_key("foo AAAA"), Err(Error::InvalidPublicKey(_))));
        assert!(matches!(
            parse_public_key("ssh-rsa AAAAC3NzaC1lZDI1NTE5AAAAIAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8g"),
            Err(Error::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn test_deploy_key_conflicts_and_reuse() {
        let env = test_env();
        let alice = user(&env.state, "alice");
        let one = repo(&env.state, &alice, "one");
        let two = repo(&env.state, &alice, "two");

        let first = add_deploy_key(&env.state, one.id, "ci", KEY_A, true).unwrap();
        assert!(first.is_read_only());

        let err = add_deploy_key(&env.state, one.id, "again", KEY_A, true).unwrap_err();
        assert!(matches!(err, Error::DeployKeyAlreadyExist { .. }));

        let err = add_deploy_key(&env.state, one.id, "ci", KEY_B, false).unwrap_err();
        assert!(matches!(err, Error::DeployKeyNameAlreadyUsed { .. }));

        let shared = add_deploy_key(&env.state, two.id, "ci", KEY_A, false).unwrap();
        assert_eq!(shared.key_id, first.key_id);
        assert_eq!(list_deploy_keys(&env.state, two.id).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_deploy_key_checks_access_and_drops_orphan_key() {
        let env = test_env();
        let alice = user(&env.state, "alice");
        let mallory = user(&env.state, "mallory");
        let one = repo(&env.state, &alice, "one");
        let key = add_deploy_key(&env.state, one.id, "ci", KEY_A, true).unwrap();

        let err = delete_deploy_key(&env.state, &mallory, key.id).unwrap_err();
        assert!(matches!(err, Error::KeyAccessDenied { .. }));

        delete_deploy_key(&env.state, &alice, key.id).unwrap();
        assert!(list_deploy_keys(&env.state, one.id).unwrap().is_empty());

        let conn = env.state.store.connection();
        assert!(
            get_public_key_by_fingerprint(&conn, &key.fingerprint)
                .unwrap()
                .is_none()
        );
        drop(conn);

        let err = delete_deploy_key(&env.state, &alice, key.id).unwrap_err();
        assert!(matches!(err, Error::DeployKeyNotExist(_)));
    }
}
