//! Command-line construction for dump and restore tools.
//!
//! Argument order is fixed: connection flags, then mode flags, then table
//! include/exclude flags, then the output or input location. The same inputs
//! always produce the same argv.

use std::path::{Path, PathBuf};

use super::tools::Tool;
use super::{BackupOptions, ConnectionParams, DumpFormat, RestoreOptions};
use crate::backup::model::DatabaseEngine;
use crate::error::{Result, VaultError};

/// One fully-specified tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub tool: Tool,
    pub args: Vec<String>,
    pub env: Vec<(&'static str, String)>,
    /// File fed to the tool's stdin
    pub stdin: Option<PathBuf>,
    /// A non-zero exit whose stderr contains this text still counts as success
    pub tolerate: Option<&'static str>,
}

impl ToolInvocation {
    fn new(tool: Tool, args: Vec<String>, conn: &ConnectionParams) -> Self {
        Self {
            tool,
            args,
            env: password_env(conn),
            stdin: None,
            tolerate: None,
        }
    }
}

pub fn dump_tool(engine: DatabaseEngine) -> Tool {
    match engine {
        DatabaseEngine::Postgres => Tool::PgDump,
        DatabaseEngine::Mysql => Tool::MysqlDump,
    }
}

/// Reject option combinations no engine can honour.
pub fn validate_backup_options(engine: DatabaseEngine, options: &BackupOptions) -> Result<()> {
    if options.schema_only && options.data_only {
        return Err(VaultError::invalid_options(
            "schema_only and data_only are mutually exclusive",
        ));
    }
    match engine {
        DatabaseEngine::Postgres => {
            if options.parallel_jobs.is_some_and(|n| n > 1) && options.format != DumpFormat::Directory {
                return Err(VaultError::invalid_options(
                    "parallel pg_dump requires the directory format",
                ));
            }
            if options.format == DumpFormat::Directory && options.compression.is_some() {
                return Err(VaultError::invalid_options(
                    "directory-format dumps cannot be compressed into a single file",
                ));
            }
        }
        DatabaseEngine::Mysql => {
            if options.format != DumpFormat::Plain {
                return Err(VaultError::invalid_options(format!(
                    "mysqldump only produces plain dumps, not {:?}",
                    options.format
                )));
            }
            if options.parallel_jobs.is_some_and(|n| n > 1) {
                return Err(VaultError::invalid_options("mysqldump does not support parallel dumps"));
            }
        }
    }
    Ok(())
}

/// Build the dump command writing to `output`.
pub fn dump_invocation(
    conn: &ConnectionParams,
    options: &BackupOptions,
    output: &Path,
) -> Result<ToolInvocation> {
    validate_backup_options(conn.engine, options)?;
    let verbose = options.verbose || options.progress.is_some();
    let args = match conn.engine {
        DatabaseEngine::Postgres => pg_dump_args(conn, options, verbose, output),
        DatabaseEngine::Mysql => mysqldump_args(conn, options, verbose, output),
    };
    Ok(ToolInvocation::new(dump_tool(conn.engine), args, conn))
}

fn pg_connection_args(conn: &ConnectionParams, database: &str) -> Vec<String> {
    vec![
        format!("--host={}", conn.host),
        format!("--port={}", conn.port),
        format!("--username={}", conn.username),
        format!("--dbname={}", database),
        "--no-password".to_string(),
    ]
}

fn mysql_connection_args(conn: &ConnectionParams) -> Vec<String> {
    let mut args = vec![
        format!("--host={}", conn.host),
        format!("--port={}", conn.port),
        format!("--user={}", conn.username),
    ];
    if let Some(password) = &conn.password {
        args.push(format!("--password={}", password));
    }
    args
}

fn pg_dump_args(conn: &ConnectionParams, options: &BackupOptions, verbose: bool, output: &Path) -> Vec<String> {
    let mut args = pg_connection_args(conn, &conn.database);

    args.push(format!("--format={}", options.format.pg_flag()));
    if options.schema_only {
        args.push("--schema-only".to_string());
    }
    if options.data_only {
        args.push("--data-only".to_string());
    }
    if let Some(jobs) = options.parallel_jobs.filter(|n| *n > 1) {
        args.push(format!("--jobs={}", jobs));
    }
    if verbose {
        args.push("--verbose".to_string());
    }

    args.extend(options.include_tables.iter().map(|t| format!("--table={}", t)));
    args.extend(options.exclude_tables.iter().map(|t| format!("--exclude-table={}", t)));

    args.push(format!("--file={}", output.display()));
    args
}

fn mysqldump_args(conn: &ConnectionParams, options: &BackupOptions, verbose: bool, output: &Path) -> Vec<String> {
    let mut args = mysql_connection_args(conn);

    args.push("--single-transaction".to_string());
    args.push("--routines".to_string());
    args.push("--triggers".to_string());
    if options.schema_only {
        args.push("--no-data".to_string());
    }
    if options.data_only {
        args.push("--no-create-info".to_string());
    }
    if verbose {
        args.push("--verbose".to_string());
    }

    args.extend(
        options
            .exclude_tables
            .iter()
            .map(|t| format!("--ignore-table={}.{}", conn.database, t)),
    );
    args.push(format!("--result-file={}", output.display()));

    // Positional: database, then the tables to include
    args.push(conn.database.clone());
    args.extend(options.include_tables.iter().cloned());
    args
}

/// Build every command a restore needs, in execution order. Database
/// preparation steps come first, the restore itself last.
pub fn restore_invocations(
    conn: &ConnectionParams,
    artifact: &Path,
    options: &RestoreOptions,
) -> Vec<ToolInvocation> {
    match conn.engine {
        DatabaseEngine::Postgres => postgres_restore(conn, artifact, options),
        DatabaseEngine::Mysql => mysql_restore(conn, artifact, options),
    }
}

fn is_plain_sql(artifact: &Path) -> bool {
    !artifact.is_dir()
        && artifact
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
}

fn postgres_restore(conn: &ConnectionParams, artifact: &Path, options: &RestoreOptions) -> Vec<ToolInvocation> {
    let plain = is_plain_sql(artifact);
    let ident = pg_identifier(&conn.database);
    let mut steps = Vec::new();

    // Plain scripts cannot clean objects, so the database is recreated instead
    if plain && options.drop_existing {
        steps.push(psql_command(conn, format!("DROP DATABASE IF EXISTS {}", ident), None));
        steps.push(psql_command(conn, format!("CREATE DATABASE {}", ident), None));
    } else if options.create_database {
        steps.push(psql_command(
            conn,
            format!("CREATE DATABASE {}", ident),
            Some("already exists"),
        ));
    }

    if plain {
        let mut args = pg_connection_args(conn, &conn.database);
        args.push("--no-psqlrc".to_string());
        if !options.force {
            args.push("--set=ON_ERROR_STOP=1".to_string());
        }
        args.push(format!("--file={}", artifact.display()));
        steps.push(ToolInvocation::new(Tool::Psql, args, conn));
    } else {
        let mut args = pg_connection_args(conn, &conn.database);
        if options.drop_existing {
            args.push("--clean".to_string());
            args.push("--if-exists".to_string());
        }
        if let Some(jobs) = options.parallel_jobs.filter(|n| *n > 1) {
            args.push(format!("--jobs={}", jobs));
        }
        args.push("--verbose".to_string());
        if !options.force {
            args.push("--exit-on-error".to_string());
        }
        args.push(artifact.display().to_string());
        steps.push(ToolInvocation::new(Tool::PgRestore, args, conn));
    }
    steps
}

fn psql_command(conn: &ConnectionParams, sql: String, tolerate: Option<&'static str>) -> ToolInvocation {
    let mut args = pg_connection_args(conn, "postgres");
    args.push("--no-psqlrc".to_string());
    args.push(format!("--command={}", sql));
    let mut invocation = ToolInvocation::new(Tool::Psql, args, conn);
    invocation.tolerate = tolerate;
    invocation
}

fn mysql_restore(conn: &ConnectionParams, artifact: &Path, options: &RestoreOptions) -> Vec<ToolInvocation> {
    let ident = mysql_identifier(&conn.database);
    let mut steps = Vec::new();

    if options.drop_existing {
        steps.push(mysql_command(conn, format!("DROP DATABASE IF EXISTS {}", ident)));
        steps.push(mysql_command(conn, format!("CREATE DATABASE {}", ident)));
    } else if options.create_database {
        steps.push(mysql_command(conn, format!("CREATE DATABASE IF NOT EXISTS {}", ident)));
    }

    let mut args = mysql_connection_args(conn);
    if options.force {
        args.push("--force".to_string());
    }
    args.push(conn.database.clone());
    let mut restore = ToolInvocation::new(Tool::Mysql, args, conn);
    restore.stdin = Some(artifact.to_path_buf());
    steps.push(restore);
    steps
}

fn mysql_command(conn: &ConnectionParams, sql: String) -> ToolInvocation {
    let mut args = mysql_connection_args(conn);
    args.push(format!("--execute={}", sql));
    ToolInvocation::new(Tool::Mysql, args, conn)
}

fn password_env(conn: &ConnectionParams) -> Vec<(&'static str, String)> {
    match (conn.engine, &conn.password) {
        (DatabaseEngine::Postgres, Some(password)) => vec![("PGPASSWORD", password.clone())],
        _ => Vec::new(),
    }
}

fn pg_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn mysql_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::executor::{CompressionAlgorithm, ProgressCallback};

    fn pg() -> ConnectionParams {
        ConnectionParams {
            engine: DatabaseEngine::Postgres,
            host: "db.internal".into(),
            port: 5432,
            username: "backup".into(),
            password: Some("s3cret".into()),
            database: "shop".into(),
        }
    }

    fn my() -> ConnectionParams {
        ConnectionParams {
            engine: DatabaseEngine::Mysql,
            port: 3306,
            ..pg()
        }
    }

    #[test]
    fn test_pg_dump_argv_order() {
        let options = BackupOptions {
            include_tables: vec!["users".into()],
            exclude_tables: vec!["audit".into()],
            schema_only: true,
            format: DumpFormat::Custom,
            ..Default::default()
        };
        let inv = dump_invocation(&pg(), &options, Path::new("/out/shop.dump")).unwrap();
        assert_eq!(inv.tool, Tool::PgDump);
        assert_eq!(
            inv.args,
            vec![
                "--host=db.internal",
                "--port=5432",
                "--username=backup",
                "--dbname=shop",
                "--no-password",
                "--format=c",
                "--schema-only",
                "--table=users",
                "--exclude-table=audit",
                "--file=/out/shop.dump",
            ]
        );
        assert_eq!(inv.env, vec![("PGPASSWORD", "s3cret".to_string())]);
        assert!(!inv.args.iter().any(|a| a.contains("s3cret")));
    }

    #[test]
    fn test_argv_is_deterministic() {
        let options = BackupOptions {
            include_tables: vec!["b".into(), "a".into()],
            verbose: true,
            ..Default::default()
        };
        let first = dump_invocation(&my(), &options, Path::new("/o.sql")).unwrap();
        let second = dump_invocation(&my(), &options, Path::new("/o.sql")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_mysqldump_password_flag_and_positionals() {
        let options = BackupOptions {
            include_tables: vec!["orders".into()],
            exclude_tables: vec!["sessions".into()],
            data_only: true,
            ..Default::default()
        };
        let inv = dump_invocation(&my(), &options, Path::new("/out/shop.sql")).unwrap();
        assert_eq!(inv.tool, Tool::MysqlDump);
        assert!(inv.env.is_empty());
        assert_eq!(inv.args[3], "--password=s3cret");
        assert!(inv.args.contains(&"--no-create-info".to_string()));
        assert!(inv.args.contains(&"--ignore-table=shop.sessions".to_string()));
        let n = inv.args.len();
        assert_eq!(&inv.args[n - 2..], &["shop".to_string(), "orders".to_string()]);
    }

    #[test]
    fn test_progress_callback_forces_verbose() {
        let options = BackupOptions {
            progress: Some(ProgressCallback::new(|_, _| {})),
            ..Default::default()
        };
        let inv = dump_invocation(&pg(), &options, Path::new("/o.sql")).unwrap();
        assert!(inv.args.contains(&"--verbose".to_string()));
    }

    #[test]
    fn test_conflicting_options_rejected() {
        let both = BackupOptions {
            schema_only: true,
            data_only: true,
            ..Default::default()
        };
        let err = dump_invocation(&pg(), &both, Path::new("/o")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidOptions);

        let custom_mysql = BackupOptions {
            format: DumpFormat::Custom,
            ..Default::default()
        };
        assert!(dump_invocation(&my(), &custom_mysql, Path::new("/o")).is_err());

        let compressed_dir = BackupOptions {
            format: DumpFormat::Directory,
            compression: Some(CompressionAlgorithm::Gzip),
            ..Default::default()
        };
        assert!(dump_invocation(&pg(), &compressed_dir, Path::new("/o")).is_err());
    }

    #[test]
    fn test_pg_restore_archive() {
        let options = RestoreOptions {
            drop_existing: true,
            parallel_jobs: Some(4),
            ..Default::default()
        };
        let steps = restore_invocations(&pg(), Path::new("/in/shop.dump"), &options);
        assert_eq!(steps.len(), 1);
        let inv = &steps[0];
        assert_eq!(inv.tool, Tool::PgRestore);
        assert!(inv.args.contains(&"--clean".to_string()));
        assert!(inv.args.contains(&"--jobs=4".to_string()));
        assert!(inv.args.contains(&"--exit-on-error".to_string()));
        assert_eq!(inv.args.last().unwrap(), "/in/shop.dump");
    }

    #[test]
    fn test_pg_plain_restore_with_create() {
        let options = RestoreOptions {
            create_database: true,
            force: true,
            ..Default::default()
        };
        let steps = restore_invocations(&pg(), Path::new("/in/shop.sql"), &options);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].tool, Tool::Psql);
        assert_eq!(steps[0].tolerate, Some("already exists"));
        assert!(steps[0].args.contains(&"--dbname=postgres".to_string()));
        assert!(steps[0].args.contains(&"--command=CREATE DATABASE \"shop\"".to_string()));
        assert_eq!(steps[1].tool, Tool::Psql);
        assert!(!steps[1].args.iter().any(|a| a.contains("ON_ERROR_STOP")));
        assert_eq!(steps[1].args.last().unwrap(), "--file=/in/shop.sql");
    }

    #[test]
    fn test_mysql_restore_reads_stdin() {
        let options = RestoreOptions {
            drop_existing: true,
            ..Default::default()
        };
        let steps = restore_invocations(&my(), Path::new("/in/shop.sql"), &options);
        assert_eq!(steps.len(), 3);
        assert!(steps[0].args.last().unwrap().contains("DROP DATABASE IF EXISTS `shop`"));
        assert_eq!(steps[2].stdin.as_deref(), Some(Path::new("/in/shop.sql")));
        assert_eq!(steps[2].args.last().unwrap(), "shop");
    }

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(pg_identifier(r#"we"ird"#), r#""we""ird""#);
        assert_eq!(mysql_identifier("we`ird"), "`we``ird`");
    }
}
