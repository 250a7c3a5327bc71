use tracing::debug;

use crate::error::Result;
use crate::state::AppState;
use crate::store::repo::must_get_repository;
use crate::store::social::{WATCH_MODE_NORMAL, delete_star, insert_star, is_staring, set_watch_mode};
use crate::store::user::must_get_user;

/// Stars or unstars a repository. Counters on both the repository and the
/// user move in the same transaction as the star row.
pub fn star_repo(state: &AppState, user_id: i64, repo_id: i64, star: bool) -> Result<()> {
    let session = state.store.begin()?;
    must_get_user(&session, user_id)?;
    must_get_repository(&session, repo_id)?;

    let staring = is_staring(&session, user_id, repo_id)?;
    match (star, staring) {
        (true, false) => insert_star(&session, user_id, repo_id)?,
        (false, true) => delete_star(&session, user_id, repo_id)?,
        _ => return Ok(()),
    }
    session.commit()?;
    debug!(user_id, repo_id, star, "Updated star");
    Ok(())
}

pub fn watch_repo(state: &AppState, user_id: i64, repo_id: i64, watch: bool) -> Result<()> {
    let session = state.store.begin()?;
    must_get_user(&session, user_id)?;
    must_get_repository(&session, repo_id)?;

    let mode = watch.then_some(WATCH_MODE_NORMAL);
    set_watch_mode(&session, user_id, repo_id, mode)?;
    session.commit()?;
    debug!(user_id, repo_id, watch, "Updated watch");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::repository::{CreateRepoOptions, create_repository};
    use crate::state::test_support::{test_env, user};
    use crate::store::repo::get_repository_by_id;
    use crate::store::user::get_user_by_id;

    #[test]
    fn test_star_and_watch_keep_counters() {
        let env = test_env();
        let alice = user(&env.state, "alice");
        let bob = user(&env.state, "bob");
        let repo = create_repository(
            &env.state,
            &alice,
            &alice,
            CreateRepoOptions {
                name: "demo".to_string(),
                ..CreateRepoOptions::default()
            },
            false,
        )
        .unwrap();

        star_repo(&env.state, bob.id, repo.id, true).unwrap();
        star_repo(&env.state, bob.id, repo.id, true).unwrap();
        watch_repo(&env.state, bob.id, repo.id, true).unwrap();
        {
            let conn = env.state.store.connection();
            let repo = get_repository_by_id(&conn, repo.id).unwrap().unwrap();
            assert_eq!(repo.num_stars, 1);
            // alice auto-watches her own repository
            assert_eq!(repo.num_watches, 2);
            assert_eq!(get_user_by_id(&conn, bob.id).unwrap().unwrap().num_stars, 1);
        }

        star_repo(&env.state, bob.id, repo.id, false).unwrap();
        watch_repo(&env.state, alice.id, repo.id, false).unwrap();
        let conn = env.state.store.connection();
        let repo = get_repository_by_id(&conn, repo.id).unwrap().unwrap();
        assert_eq!(repo.num_stars, 0);
        assert_eq!(repo.num_watches, 1);
        assert_eq!(get_user_by_id(&conn, bob.id).unwrap().unwrap().num_stars, 0);
    }

    #[test]
    fn test_star_missing_repository() {
        let env = test_env();
        let bob = user(&env.state, "bob");
        let err = star_repo(&env.state, bob.id, 404, true).unwrap_err();
        assert!(matches!(err, Error::RepoNotExist { id: 404 }));
    }
}
