pub const SCHEMA: &str = r#"
-- Accounts: individuals (type 0) and organizations (type 1)
CREATE TABLE IF NOT EXISTS user (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    lower_name TEXT NOT NULL UNIQUE,
    type INTEGER NOT NULL DEFAULT 0,
    is_admin INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    num_repos INTEGER NOT NULL DEFAULT 0,
    num_stars INTEGER NOT NULL DEFAULT 0,
    max_repo_creation INTEGER NOT NULL DEFAULT -1,
    last_repo_visibility INTEGER NOT NULL DEFAULT 0,
    created_unix INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS user_redirect (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    lower_name TEXT NOT NULL UNIQUE,
    redirect_user_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS org_user (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid INTEGER NOT NULL,
    org_id INTEGER NOT NULL,
    UNIQUE(uid, org_id)
);

CREATE TABLE IF NOT EXISTS team (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    lower_name TEXT NOT NULL,
    authorize INTEGER NOT NULL DEFAULT 1,
    includes_all_repositories INTEGER NOT NULL DEFAULT 0,
    num_repos INTEGER NOT NULL DEFAULT 0,
    UNIQUE(org_id, lower_name)
);

CREATE TABLE IF NOT EXISTS team_user (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL,
    team_id INTEGER NOT NULL,
    uid INTEGER NOT NULL,
    UNIQUE(team_id, uid)
);

CREATE TABLE IF NOT EXISTS team_repo (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL,
    team_id INTEGER NOT NULL,
    repo_id INTEGER NOT NULL,
    UNIQUE(team_id, repo_id)
);

CREATE TABLE IF NOT EXISTS repository (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL,
    owner_name TEXT NOT NULL,
    lower_name TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    default_branch TEXT NOT NULL DEFAULT '',
    original_url TEXT NOT NULL DEFAULT '',
    is_private INTEGER NOT NULL DEFAULT 0,
    is_archived INTEGER DEFAULT 0,
    is_mirror INTEGER NOT NULL DEFAULT 0,
    is_empty INTEGER NOT NULL DEFAULT 1,
    is_template INTEGER NOT NULL DEFAULT 0,
    is_fork INTEGER NOT NULL DEFAULT 0,
    fork_id INTEGER NOT NULL DEFAULT 0,
    template_id INTEGER NOT NULL DEFAULT 0,
    status INTEGER NOT NULL DEFAULT 0,
    avatar TEXT NOT NULL DEFAULT '',
    num_watches INTEGER NOT NULL DEFAULT 0,
    num_stars INTEGER NOT NULL DEFAULT 0,
    num_forks INTEGER NOT NULL DEFAULT 0,
    num_issues INTEGER NOT NULL DEFAULT 0,
    num_closed_issues INTEGER NOT NULL DEFAULT 0,
    num_pulls INTEGER NOT NULL DEFAULT 0,
    num_closed_pulls INTEGER NOT NULL DEFAULT 0,
    num_milestones INTEGER NOT NULL DEFAULT 0,
    num_closed_milestones INTEGER NOT NULL DEFAULT 0,
    size INTEGER NOT NULL DEFAULT 0,
    created_unix INTEGER NOT NULL DEFAULT 0,
    updated_unix INTEGER NOT NULL DEFAULT 0,
    UNIQUE(owner_id, lower_name)
);

-- One fork of a given base per owner
CREATE UNIQUE INDEX IF NOT EXISTS uqe_repository_owner_fork
    ON repository(owner_id, fork_id) WHERE fork_id <> 0;

CREATE TABLE IF NOT EXISTS repo_redirect (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL,
    lower_name TEXT NOT NULL,
    redirect_repo_id INTEGER NOT NULL,
    UNIQUE(owner_id, lower_name)
);

CREATE TABLE IF NOT EXISTS repo_unit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    type INTEGER NOT NULL,
    config TEXT NOT NULL DEFAULT '{}',
    created_unix INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS access (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    repo_id INTEGER NOT NULL,
    mode INTEGER NOT NULL,
    UNIQUE(user_id, repo_id)
);

CREATE TABLE IF NOT EXISTS collaboration (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    mode INTEGER NOT NULL DEFAULT 2,
    UNIQUE(repo_id, user_id)
);

-- mode: 1 normal, 2 do not watch, 3 auto
CREATE TABLE IF NOT EXISTS watch (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    repo_id INTEGER NOT NULL,
    mode INTEGER NOT NULL DEFAULT 1,
    UNIQUE(user_id, repo_id)
);

CREATE TABLE IF NOT EXISTS star (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid INTEGER NOT NULL,
    repo_id INTEGER NOT NULL,
    UNIQUE(uid, repo_id)
);

CREATE TABLE IF NOT EXISTS mirror (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL UNIQUE,
    interval INTEGER NOT NULL DEFAULT 0,
    enable_prune INTEGER NOT NULL DEFAULT 1,
    updated_unix INTEGER NOT NULL DEFAULT 0,
    next_update_unix INTEGER NOT NULL DEFAULT 0,
    lfs_enabled INTEGER NOT NULL DEFAULT 0,
    lfs_endpoint TEXT NOT NULL DEFAULT '',
    remote_address TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS push_mirror (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    remote_name TEXT NOT NULL,
    remote_address TEXT NOT NULL,
    interval INTEGER NOT NULL DEFAULT 0,
    last_update INTEGER NOT NULL DEFAULT 0,
    last_error TEXT NOT NULL DEFAULT '',
    UNIQUE(repo_id, remote_name)
);

-- status: 0 generating, 1 ready
CREATE TABLE IF NOT EXISTS repo_archiver (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    type INTEGER NOT NULL,
    status INTEGER NOT NULL DEFAULT 0,
    commit_id TEXT NOT NULL,
    created_unix INTEGER NOT NULL,
    UNIQUE(repo_id, type, commit_id)
);

CREATE TABLE IF NOT EXISTS public_key (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL DEFAULT 0,
    name TEXT NOT NULL,
    fingerprint TEXT NOT NULL UNIQUE,
    content TEXT NOT NULL,
    mode INTEGER NOT NULL DEFAULT 2,
    type INTEGER NOT NULL DEFAULT 1,
    created_unix INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS deploy_key (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key_id INTEGER NOT NULL,
    repo_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    mode INTEGER NOT NULL DEFAULT 1,
    created_unix INTEGER NOT NULL DEFAULT 0,
    UNIQUE(key_id, repo_id),
    UNIQUE(repo_id, name)
);

CREATE TABLE IF NOT EXISTS lfs_meta_object (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    oid TEXT NOT NULL,
    size INTEGER NOT NULL,
    repository_id INTEGER NOT NULL,
    created_unix INTEGER NOT NULL DEFAULT 0,
    UNIQUE(oid, repository_id)
);

CREATE TABLE IF NOT EXISTS lfs_lock (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    owner_id INTEGER NOT NULL,
    path TEXT NOT NULL
);

-- Issue tracker rows kept only as far as cascade and recount need them
CREATE TABLE IF NOT EXISTS issue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    "index" INTEGER NOT NULL,
    poster_id INTEGER NOT NULL DEFAULT 0,
    name TEXT NOT NULL DEFAULT '',
    is_closed INTEGER NOT NULL DEFAULT 0,
    is_pull INTEGER NOT NULL DEFAULT 0,
    num_comments INTEGER NOT NULL DEFAULT 0,
    created_unix INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS issue_index (
    group_id INTEGER PRIMARY KEY,
    max_index INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS label (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL DEFAULT 0,
    org_id INTEGER NOT NULL DEFAULT 0,
    name TEXT NOT NULL,
    num_issues INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS issue_label (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id INTEGER NOT NULL,
    label_id INTEGER NOT NULL,
    UNIQUE(issue_id, label_id)
);

-- type 0 is a plain comment
CREATE TABLE IF NOT EXISTS comment (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type INTEGER NOT NULL DEFAULT 0,
    issue_id INTEGER NOT NULL,
    ref_repo_id INTEGER NOT NULL DEFAULT 0,
    poster_id INTEGER NOT NULL DEFAULT 0,
    content TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS reaction (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id INTEGER NOT NULL,
    comment_id INTEGER NOT NULL DEFAULT 0,
    user_id INTEGER NOT NULL,
    type TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS issue_user (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid INTEGER NOT NULL,
    issue_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS pull_request (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id INTEGER NOT NULL,
    "index" INTEGER NOT NULL DEFAULT 0,
    head_repo_id INTEGER NOT NULL DEFAULT 0,
    base_repo_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS attachment (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    repo_id INTEGER NOT NULL DEFAULT 0,
    issue_id INTEGER NOT NULL DEFAULT 0,
    release_id INTEGER NOT NULL DEFAULT 0,
    name TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS milestone (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    is_closed INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS "release" (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    tag_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS project (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    title TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS project_board (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    title TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS project_issue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id INTEGER NOT NULL,
    project_id INTEGER NOT NULL,
    project_board_id INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS action (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    op_type INTEGER NOT NULL,
    repo_id INTEGER NOT NULL,
    created_unix INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS commit_status (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    sha TEXT NOT NULL,
    state TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS deleted_branch (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    commit_id TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS protected_branch (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    branch_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS protected_tag (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    name_pattern TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS language_stat (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    language TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS notification (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    repo_id INTEGER NOT NULL,
    issue_id INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS repo_indexer_status (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    indexer_type INTEGER NOT NULL DEFAULT 0,
    commit_sha TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS topic (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    repo_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS repo_topic (
    repo_id INTEGER NOT NULL,
    topic_id INTEGER NOT NULL,
    PRIMARY KEY (repo_id, topic_id)
);

CREATE TABLE IF NOT EXISTS repo_transfer (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    doer_id INTEGER NOT NULL,
    recipient_id INTEGER NOT NULL,
    repo_id INTEGER NOT NULL
);

-- Migration tasks
CREATE TABLE IF NOT EXISTS task (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    doer_id INTEGER NOT NULL DEFAULT 0,
    owner_id INTEGER NOT NULL DEFAULT 0,
    repo_id INTEGER NOT NULL,
    type INTEGER NOT NULL DEFAULT 0,
    status INTEGER NOT NULL DEFAULT 0,
    message TEXT NOT NULL DEFAULT ''
);

-- repo_id = 0 and owner_id = 0 marks a default hook copied into new repositories
CREATE TABLE IF NOT EXISTS webhook (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL DEFAULT 0,
    owner_id INTEGER NOT NULL DEFAULT 0,
    is_system_webhook INTEGER NOT NULL DEFAULT 0,
    url TEXT NOT NULL,
    content_type INTEGER NOT NULL DEFAULT 1,
    events TEXT NOT NULL DEFAULT '{}',
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS hook_task (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    hook_id INTEGER NOT NULL,
    payload TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS notice (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type INTEGER NOT NULL,
    description TEXT NOT NULL,
    created_unix INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_repository_owner ON repository(owner_id);
CREATE INDEX IF NOT EXISTS idx_repository_fork ON repository(fork_id);
CREATE INDEX IF NOT EXISTS idx_mirror_next_update ON mirror(next_update_unix);
CREATE INDEX IF NOT EXISTS idx_repo_archiver_created ON repo_archiver(created_unix);
CREATE INDEX IF NOT EXISTS idx_repo_unit_repo ON repo_unit(repo_id);
CREATE INDEX IF NOT EXISTS idx_issue_repo ON issue(repo_id);
CREATE INDEX IF NOT EXISTS idx_comment_issue ON comment(issue_id);
CREATE INDEX IF NOT EXISTS idx_issue_label_label ON issue_label(label_id);
CREATE INDEX IF NOT EXISTS idx_watch_repo ON watch(repo_id);
CREATE INDEX IF NOT EXISTS idx_star_repo ON star(repo_id);
CREATE INDEX IF NOT EXISTS idx_lfs_meta_object_oid ON lfs_meta_object(oid);
"#;
