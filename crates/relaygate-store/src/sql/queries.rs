//! SQL statements for the supported databases.

/// Active tokens (PostgreSQL / SQLite).
pub const ACTIVE_TOKENS: &str = r#"
SELECT token FROM proxy_tokens
WHERE is_active = TRUE AND is_blocked = FALSE
"#;

/// All relay nodes.
pub const LOAD_NODES: &str = r#"
SELECT host, port, residential, online, created_at, last_checked
FROM relay_nodes
"#;

/// Upsert a node by `(host, port)` (PostgreSQL / SQLite).
pub const UPSERT_NODE_PG: &str = r#"
INSERT INTO relay_nodes (host, port, residential, online, created_at, last_checked)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (host, port) DO UPDATE
SET residential = $3, online = $4, last_checked = $6
"#;

/// Upsert a node by `(host, port)` (MySQL).
pub const UPSERT_NODE_MYSQL: &str = r#"
INSERT INTO relay_nodes (host, port, residential, online, created_at, last_checked)
VALUES (?, ?, ?, ?, ?, ?)
ON DUPLICATE KEY UPDATE residential = VALUES(residential),
online = VALUES(online), last_checked = VALUES(last_checked)
"#;

/// Open a session record, returning its id (PostgreSQL / SQLite).
pub const APPEND_SESSION_PG: &str = r#"
INSERT INTO token_sessions (token, started_at)
VALUES ($1, $2)
RETURNING id
"#;

/// Open a session record (MySQL; id fetched separately).
pub const APPEND_SESSION_MYSQL: &str = r#"
INSERT INTO token_sessions (token, started_at)
VALUES (?, ?)
"#;

/// Close a session record with final counts (PostgreSQL).
pub const CLOSE_SESSION_PG: &str = r#"
UPDATE token_sessions
SET ended_at = $1, bytes_up = $2, bytes_down = $3
WHERE id = $4
"#;

/// Close a session record with final counts (MySQL / SQLite).
pub const CLOSE_SESSION_MYSQL: &str = r#"
UPDATE token_sessions
SET ended_at = ?, bytes_up = ?, bytes_down = ?
WHERE id = ?
"#;

/// Byte total over the trailing window (PostgreSQL).
pub const SUM_BYTES_PG: &str = r#"
SELECT COALESCE(SUM(bytes_up + bytes_down), 0) AS total
FROM token_sessions
WHERE token = $1 AND started_at >= $2
"#;

/// Byte total over the trailing window (MySQL / SQLite).
pub const SUM_BYTES_MYSQL: &str = r#"
SELECT COALESCE(SUM(bytes_up + bytes_down), 0) AS total
FROM token_sessions
WHERE token = ? AND started_at >= ?
"#;

/// Table existence probe (PostgreSQL).
pub const TABLE_EXISTS_PG: &str = r#"
SELECT EXISTS (
    SELECT 1 FROM information_schema.tables
    WHERE table_schema = 'public' AND table_name = $1
) AS present
"#;

/// Table existence probe (MySQL).
pub const TABLE_EXISTS_MYSQL: &str = r#"
SELECT COUNT(*) > 0 AS present
FROM information_schema.tables
WHERE table_schema = DATABASE() AND table_name = ?
"#;

/// Table existence probe (SQLite).
pub const TABLE_EXISTS_SQLITE: &str = r#"
SELECT COUNT(*) > 0 AS present
FROM sqlite_master
WHERE type = 'table' AND name = ?
"#;
