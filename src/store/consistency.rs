//! Recount and orphan queries behind the consistency checker.

use rusqlite::{Connection, params};

use crate::error::{Error, Result};

/// A denormalized counter: `find` selects the ids whose stored value
/// disagrees with the true count, `fix` recomputes it for id `?1`.
#[derive(Debug, Clone, Copy)]
pub struct CounterCheck {
    pub name: &'static str,
    find: &'static str,
    fix: &'static str,
}

pub const REPO_STATS_CHECKS: &[CounterCheck] = &[
    CounterCheck {
        name: "repository watch count",
        find: "SELECT repo.id FROM repository repo
               WHERE repo.num_watches != (SELECT COUNT(*) FROM watch
                   WHERE watch.repo_id = repo.id AND watch.mode <> 2)",
        fix: "UPDATE repository SET num_watches = (SELECT COUNT(*) FROM watch
                  WHERE watch.repo_id = ?1 AND watch.mode <> 2)
              WHERE id = ?1",
    },
    CounterCheck {
        name: "repository star count",
        find: "SELECT repo.id FROM repository repo
               WHERE repo.num_stars != (SELECT COUNT(*) FROM star WHERE star.repo_id = repo.id)",
        fix: "UPDATE repository SET num_stars = (SELECT COUNT(*) FROM star WHERE star.repo_id = ?1)
              WHERE id = ?1",
    },
    CounterCheck {
        name: "label issue count",
        find: "SELECT label.id FROM label
               WHERE label.num_issues != (SELECT COUNT(*) FROM issue_label
                   WHERE issue_label.label_id = label.id)",
        fix: "UPDATE label SET num_issues = (SELECT COUNT(*) FROM issue_label
                  WHERE issue_label.label_id = ?1)
              WHERE id = ?1",
    },
    CounterCheck {
        name: "user repository count",
        find: "SELECT u.id FROM user u
               WHERE u.num_repos != (SELECT COUNT(*) FROM repository WHERE repository.owner_id = u.id)",
        fix: "UPDATE user SET num_repos = (SELECT COUNT(*) FROM repository WHERE repository.owner_id = ?1)
              WHERE id = ?1",
    },
    CounterCheck {
        name: "issue comment count",
        find: "SELECT issue.id FROM issue
               WHERE issue.num_comments != (SELECT COUNT(*) FROM comment
                   WHERE comment.issue_id = issue.id AND comment.type = 0)",
        fix: "UPDATE issue SET num_comments = (SELECT COUNT(*) FROM comment
                  WHERE comment.issue_id = ?1 AND comment.type = 0)
              WHERE id = ?1",
    },
    CounterCheck {
        name: "repository closed issue count",
        find: "SELECT repo.id FROM repository repo
               WHERE repo.num_closed_issues != (SELECT COUNT(*) FROM issue
                   WHERE issue.repo_id = repo.id AND issue.is_closed = 1 AND issue.is_pull = 0)",
        fix: "UPDATE repository SET num_closed_issues = (SELECT COUNT(*) FROM issue
                  WHERE issue.repo_id = ?1 AND issue.is_closed = 1 AND issue.is_pull = 0)
              WHERE id = ?1",
    },
    CounterCheck {
        name: "repository closed pull request count",
        find: "SELECT repo.id FROM repository repo
               WHERE repo.num_closed_pulls != (SELECT COUNT(*) FROM issue
                   WHERE issue.repo_id = repo.id AND issue.is_closed = 1 AND issue.is_pull = 1)",
        fix: "UPDATE repository SET num_closed_pulls = (SELECT COUNT(*) FROM issue
                  WHERE issue.repo_id = ?1 AND issue.is_closed = 1 AND issue.is_pull = 1)
              WHERE id = ?1",
    },
    CounterCheck {
        name: "repository fork count",
        find: "SELECT repo.id FROM repository repo
               WHERE repo.num_forks != (SELECT COUNT(*) FROM repository fork
                   WHERE fork.fork_id = repo.id)",
        fix: "UPDATE repository SET num_forks = (SELECT COUNT(*) FROM repository fork
                  WHERE fork.fork_id = ?1)
              WHERE id = ?1",
    },
];

pub const USER_STARS_CHECK: CounterCheck = CounterCheck {
    name: "user star count",
    find: "SELECT u.id FROM user u
           WHERE u.num_stars != (SELECT COUNT(*) FROM star WHERE star.uid = u.id)",
    fix: "UPDATE user SET num_stars = (SELECT COUNT(*) FROM star WHERE star.uid = ?1)
          WHERE id = ?1",
};

pub fn find_mismatched(conn: &Connection, check: &CounterCheck) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(check.find)?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

pub fn correct_counter(conn: &Connection, check: &CounterCheck, id: i64) -> Result<()> {
    conn.execute(check.fix, params![id])?;
    Ok(())
}

/// Rows of `table` whose `column` points at a missing `parent` row.
/// Only rows matching `scope` are considered.
#[derive(Debug, Clone, Copy)]
pub struct OrphanCheck {
    pub name: &'static str,
    table: &'static str,
    column: &'static str,
    parent: &'static str,
    scope: &'static str,
}

impl OrphanCheck {
    fn predicate(&self) -> String {
        format!(
            "{scope} AND NOT EXISTS (SELECT 1 FROM \"{parent}\" p WHERE p.id = \"{table}\".{column})",
            scope = self.scope,
            parent = self.parent,
            table = self.table,
            column = self.column,
        )
    }
}

pub const ORPHAN_CHECKS: &[OrphanCheck] = &[
    OrphanCheck {
        name: "labels without repository",
        table: "label",
        column: "repo_id",
        parent: "repository",
        scope: "repo_id > 0",
    },
    OrphanCheck {
        name: "labels without organization",
        table: "label",
        column: "org_id",
        parent: "user",
        scope: "org_id > 0",
    },
    OrphanCheck {
        name: "issue labels without label",
        table: "issue_label",
        column: "label_id",
        parent: "label",
        scope: "1 = 1",
    },
    OrphanCheck {
        name: "issues without repository",
        table: "issue",
        column: "repo_id",
        parent: "repository",
        scope: "1 = 1",
    },
    OrphanCheck {
        name: "pull requests without issue",
        table: "pull_request",
        column: "issue_id",
        parent: "issue",
        scope: "1 = 1",
    },
    OrphanCheck {
        name: "comments without issue",
        table: "comment",
        column: "issue_id",
        parent: "issue",
        scope: "issue_id > 0",
    },
    OrphanCheck {
        name: "milestones without repository",
        table: "milestone",
        column: "repo_id",
        parent: "repository",
        scope: "1 = 1",
    },
    OrphanCheck {
        name: "releases without repository",
        table: "release",
        column: "repo_id",
        parent: "repository",
        scope: "1 = 1",
    },
    OrphanCheck {
        name: "units without repository",
        table: "repo_unit",
        column: "repo_id",
        parent: "repository",
        scope: "1 = 1",
    },
];

pub fn count_orphaned_objects(conn: &Connection, check: &OrphanCheck) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM \"{}\" WHERE {}", check.table, check.predicate());
    conn.query_row(&sql, [], |row| row.get(0))
        .map_err(Error::from)
}

pub fn delete_orphaned_objects(conn: &Connection, check: &OrphanCheck) -> Result<usize> {
    let sql = format!("DELETE FROM \"{}\" WHERE {}", check.table, check.predicate());
    conn.execute(&sql, []).map_err(Error::from)
}

pub fn count_null_archived(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM repository WHERE is_archived IS NULL",
        [],
        |row| row.get(0),
    )
    .map_err(Error::from)
}

pub fn fix_null_archived(conn: &Connection) -> Result<usize> {
    conn.execute(
        "UPDATE repository SET is_archived = 0 WHERE is_archived IS NULL",
        [],
    )
    .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use tempfile::TempDir;

    fn open_store(temp: &TempDir) -> SqliteStore {
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        store
    }

    #[test]
    fn test_orphan_queries() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let conn = store.connection();
        conn.execute_batch(
            "INSERT INTO label (repo_id, name) VALUES (42, 'bug');
             INSERT INTO issue (repo_id, \"index\") VALUES (42, 1);
             INSERT INTO pull_request (issue_id, base_repo_id) VALUES (99, 42);
             INSERT INTO \"release\" (repo_id, tag_name) VALUES (42, 'v1');",
        )
        .unwrap();

        let counts: Vec<i64> = ORPHAN_CHECKS
            .iter()
            .map(|check| count_orphaned_objects(&conn, check).unwrap())
            .collect();
        assert_eq!(counts.iter().sum::<i64>(), 4);

        for check in ORPHAN_CHECKS {
            delete_orphaned_objects(&conn, check).unwrap();
        }
        for check in ORPHAN_CHECKS {
            assert_eq!(count_orphaned_objects(&conn, check).unwrap(), 0, "{}", check.name);
        }
    }

    #[test]
    fn test_null_archived_repair() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let conn = store.connection();
        conn.execute(
            "INSERT INTO repository (owner_id, owner_name, lower_name, name, is_archived)
             VALUES (1, 'alice', 'demo', 'demo', NULL)",
            [],
        )
        .unwrap();

        assert_eq!(count_null_archived(&conn).unwrap(), 1);
        assert_eq!(fix_null_archived(&conn).unwrap(), 1);
        assert_eq!(count_null_archived(&conn).unwrap(), 0);
    }

    #[test]
    fn test_counter_check_finds_and_fixes() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let conn = store.connection();
        conn.execute_batch(
            "INSERT INTO repository (id, owner_id, owner_name, lower_name, name, num_stars)
                 VALUES (7, 1, 'alice', 'demo', 'demo', 5);
             INSERT INTO star (uid, repo_id) VALUES (1, 7);",
        )
        .unwrap();

        let stars = &REPO_STATS_CHECKS[1];
        assert_eq!(find_mismatched(&conn, stars).unwrap(), vec![7]);
        correct_counter(&conn, stars, 7).unwrap();
        assert!(find_mismatched(&conn, stars).unwrap().is_empty());
    }
}
