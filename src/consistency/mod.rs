//! Background repair of denormalized counters and orphaned rows.
//!
//! Counters are kept in step by the operations that change them, but a
//! crash between a row change and its counter update can leave them off.
//! Each check selects the disagreeing rows and then fixes them one
//! statement at a time, so no long transaction holds the catalog.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::state::AppState;
use crate::store::consistency::{
    CounterCheck, ORPHAN_CHECKS, REPO_STATS_CHECKS, USER_STARS_CHECK, correct_counter,
    count_null_archived, count_orphaned_objects, delete_orphaned_objects, find_mismatched,
    fix_null_archived,
};

/// Recounts every repository, label, user and issue counter. Returns the
/// number of rows corrected.
pub fn check_repo_stats(state: &AppState, cancel: &CancellationToken) -> Result<usize> {
    let mut corrected = 0;
    for check in REPO_STATS_CHECKS {
        corrected += run_counter_check(state, check, cancel)?;
    }
    info!(corrected, "Finished repository statistics check");
    Ok(corrected)
}

/// Recomputes `user.num_stars` from the star table.
pub fn recount_user_stars(state: &AppState, cancel: &CancellationToken) -> Result<usize> {
    run_counter_check(state, &USER_STARS_CHECK, cancel)
}

fn run_counter_check(
    state: &AppState,
    check: &CounterCheck,
    cancel: &CancellationToken,
) -> Result<usize> {
    if cancel.is_cancelled() {
        return Err(Error::cancelled(format!("before checking {}", check.name)));
    }
    let ids = {
        let conn = state.store.connection();
        find_mismatched(&conn, check)?
    };

    let mut corrected = 0;
    for id in ids {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(format!("before correcting {} for {id}", check.name)));
        }
        let conn = state.store.connection();
        match correct_counter(&conn, check, id) {
            Ok(()) => corrected += 1,
            Err(e) => warn!(check = check.name, id, error = %e, "Failed to correct counter"),
        }
    }

    if corrected > 0 {
        info!(check = check.name, corrected, "Corrected counters");
    }
    Ok(corrected)
}

/// One line of a doctor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorFinding {
    pub name: &'static str,
    pub count: i64,
    pub fixed: bool,
}

/// Counts orphaned rows and `NULL` archive flags; with `fix`, deletes or
/// repairs them as well.
pub fn run_doctor(
    state: &AppState,
    fix: bool,
    cancel: &CancellationToken,
) -> Result<Vec<DoctorFinding>> {
    let mut findings = Vec::with_capacity(ORPHAN_CHECKS.len() + 1);

    for check in ORPHAN_CHECKS {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(format!("before checking {}", check.name)));
        }
        let conn = state.store.connection();
        let count = count_orphaned_objects(&conn, check)?;
        let fixed = fix && count > 0;
        if fixed {
            let deleted = delete_orphaned_objects(&conn, check)?;
            info!(check = check.name, deleted, "Deleted orphaned rows");
        }
        findings.push(DoctorFinding {
            name: check.name,
            count,
            fixed,
        });
    }

    let conn = state.store.connection();
    let count = count_null_archived(&conn)?;
    let fixed = fix && count > 0;
    if fixed {
        let repaired = fix_null_archived(&conn)?;
        info!(repaired, "Repaired NULL archive flags");
    }
    findings.push(DoctorFinding {
        name: "repositories with NULL is_archived",
        count,
        fixed,
    });

    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{
        CreateRepoOptions, ForkRepoOptions, create_repository, fork_repository, star_repo,
    };
    use crate::state::test_support::{test_env, user};
    use crate::store::repo::get_repository_by_id;
    use crate::store::user::get_user_by_id;
    use crate::types::{Repository, User};

    fn create(state: &AppState, owner: &User, name: &str) -> Repository {
        create_repository(
            state,
            owner,
            owner,
            CreateRepoOptions {
                name: name.to_string(),
                auto_init: true,
                ..CreateRepoOptions::default()
            },
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_check_repo_stats_repairs_drift_once() {
        let env = test_env();
        let alice = user(&env.state, "alice");
        let bob = user(&env.state, "bob");
        let repo = create(&env.state, &alice, "demo");
        star_repo(&env.state, bob.id, repo.id, true).unwrap();
        fork_repository(
            &env.state,
            &bob,
            &bob,
            ForkRepoOptions {
                base: repo.clone(),
                name: "demo".to_string(),
                description: String::new(),
            },
        )
        .unwrap();

        let cancel = CancellationToken::new();
        assert_eq!(check_repo_stats(&env.state, &cancel).unwrap(), 0);

        {
            let conn = env.state.store.connection();
            conn.execute_batch(&format!(
                "UPDATE repository SET num_stars = 9, num_forks = 0, num_watches = 4 WHERE id = {id};
                 UPDATE user SET num_repos = 3 WHERE id = {uid};
                 INSERT INTO issue (repo_id, \"index\", is_closed) VALUES ({id}, 1, 1);
                 INSERT INTO issue (repo_id, \"index\", is_closed, is_pull) VALUES ({id}, 2, 1, 1);",
                id = repo.id,
                uid = alice.id,
            ))
            .unwrap();
        }

        // Repository row (stars, forks, watches, closed issues, closed pulls) and user row.
        assert_eq!(check_repo_stats(&env.state, &cancel).unwrap(), 6);
        assert_eq!(check_repo_stats(&env.state, &cancel).unwrap(), 0);

        let conn = env.state.store.connection();
        let repo = get_repository_by_id(&conn, repo.id).unwrap().unwrap();
        assert_eq!(repo.num_stars, 1);
        assert_eq!(repo.num_forks, 1);
        assert_eq!(repo.num_watches, 1);
        assert_eq!(repo.num_closed_issues, 1);
        assert_eq!(repo.num_closed_pulls, 1);
        assert_eq!(get_user_by_id(&conn, alice.id).unwrap().unwrap().num_repos, 1);
    }

    #[test]
    fn test_check_repo_stats_is_cancellable() {
        let env = test_env();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = check_repo_stats(&env.state, &cancel).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_recount_user_stars() {
        let env = test_env();
        let alice = user(&env.state, "alice");
        let repo = create(&env.state, &alice, "demo");
        star_repo(&env.state, alice.id, repo.id, true).unwrap();
        {
            let conn = env.state.store.connection();
            conn.execute("UPDATE user SET num_stars = 0", []).unwrap();
        }

        assert_eq!(recount_user_stars(&env.state, &CancellationToken::new()).unwrap(), 1);
        let conn = env.state.store.connection();
        assert_eq!(get_user_by_id(&conn, alice.id).unwrap().unwrap().num_stars, 1);
    }

    #[test]
    fn test_doctor_reports_then_fixes() {
        let env = test_env();
        {
            let conn = env.state.store.connection();
            conn.execute_batch(
                "INSERT INTO label (repo_id, name) VALUES (404, 'stale');
                 INSERT INTO issue_label (issue_id, label_id) VALUES (1, 404);",
            )
            .unwrap();
        }
        let cancel = CancellationToken::new();

        let report = run_doctor(&env.state, false, &cancel).unwrap();
        let found: i64 = report.iter().map(|f| f.count).sum();
        assert_eq!(found, 2);
        assert!(report.iter().all(|f| !f.fixed));

        let fixed = run_doctor(&env.state, true, &cancel).unwrap();
        assert_eq!(fixed.iter().filter(|f| f.fixed).count(), 2);
        let after = run_doctor(&env.state, false, &cancel).unwrap();
        assert!(after.iter().all(|f| f.count == 0));
    }
}
