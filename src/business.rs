use crate::cli::{Cli, Commands};
use log::{info, warn};
use pgforge::config::{get_config_file_path, load_config, load_registry};
use pgforge::connection::{ConnectionDescriptor, ConnectionInput, ConnectionRegistry};
use pgforge::core::{ConnectionSide, ForgeConfig, ForgeError, TableSummary};
use pgforge::ops::MigrationRequest;
use pgforge::script::ScriptOptions;
use pgforge::{DatabaseDriver, backup, browse, drivers, ops, script};
use serde_json::json;
use std::error::Error;
use std::io::Write;
use std::path::Path;

type JsonMap = serde_json::Map<String, serde_json::Value>;

fn print_json(value: &serde_json::Value) -> Result<(), Box<dyn Error>> {
    let text = serde_json::to_string_pretty(value).map_err(ForgeError::from)?;
    println!("{text}");
    Ok(())
}

fn parse_object(text: &str, what: &str) -> Result<JsonMap, ForgeError> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(ForgeError::Validation(format!("{what} must be a JSON object"))),
        Err(e) => Err(ForgeError::Validation(format!("{what} is not valid JSON: {e}"))),
    }
}

fn write_output(output: Option<&Path>, text: &str) -> Result<(), ForgeError> {
    match output {
        Some(path) => {
            std::fs::write(path, text)?;
            info!("written to {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

struct Session {
    config: ForgeConfig,
    registry: ConnectionRegistry,
}

impl Session {
    fn resolve(
        &self,
        input: &ConnectionInput,
        side: ConnectionSide,
    ) -> Result<ConnectionDescriptor, ForgeError> {
        self.registry.resolve(input, side)
    }

    async fn open(
        &self,
        input: &ConnectionInput,
        side: ConnectionSide,
    ) -> Result<Box<dyn DatabaseDriver>, ForgeError> {
        let descriptor = self.resolve(input, side)?;
        drivers::create_driver(&descriptor, side, &self.config).await
    }
}

pub async fn handle_command(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = load_config(cli.config.clone())?;
    info!("using config {}", get_config_file_path(cli.config.clone()));

    let registry = load_registry()?;
    if registry.quick_mode() {
        info!("quick mode: source and destination taken from the environment");
    }
    let session = Session { config, registry };
    let show_progress = cli.verbose > 0;

    match cli.command {
        Commands::Connect { source, dest } => {
            let source = session.resolve(&source.input(), ConnectionSide::Source)?;
            let dest = session.resolve(&dest.input(), ConnectionSide::Destination)?;

            ops::test_connection(&source, ConnectionSide::Source, &session.config).await?;
            ops::test_connection(&dest, ConnectionSide::Destination, &session.config).await?;

            print_json(&json!({
                "status": "ok",
                "source": "connected",
                "destination": "connected",
            }))
        }

        Commands::Analyze { source, pattern } => {
            let driver = session.open(&source.input(), ConnectionSide::Source).await?;
            let stats = ops::list_table_stats(driver.as_ref(), pattern.as_deref()).await;
            driver.close().await;

            let tables = stats?.iter().map(TableSummary::from).collect::<Vec<_>>();
            print_json(&json!({ "status": "ok", "tables": tables }))
        }

        // plan only reads the source, the destination is never opened
        Commands::DryRun {
            source,
            pattern,
            sql,
        } => {
            let driver = session.open(&source.input(), ConnectionSide::Source).await?;
            let plan = ops::build_plan(driver.as_ref(), pattern.as_deref()).await;
            driver.close().await;
            let plan = plan?;

            if sql {
                if let Some(warning) = plan.warning() {
                    println!("-- {warning}");
                }
                println!("{}", plan.to_sql());
                Ok(())
            } else {
                print_json(&json!({
                    "status": "ok",
                    "warning": plan.warning(),
                    "tables": plan.tables,
                }))
            }
        }

        Commands::Migrate {
            source,
            dest,
            pattern,
            tables,
            skip_data,
            copy_data,
            yes,
        } => {
            let mut request = MigrationRequest::new(pattern.as_deref());
            request.allow_list = tables;
            request.copy_data_default = session.config.copy_data_default();
            request
                .copy_data
                .extend(copy_data.into_iter().map(|t| (t, true)));
            request
                .copy_data
                .extend(skip_data.into_iter().map(|t| (t, false)));
            request.validate()?;

            let source_driver = session.open(&source.input(), ConnectionSide::Source).await?;

            if !yes {
                let plan = ops::build_plan(source_driver.as_ref(), pattern.as_deref()).await;
                source_driver.close().await;
                let mut plan = plan?;
                if let Some(allowed) = &request.allow_list {
                    plan.tables.retain(|t| allowed.contains(&t.table_name));
                }

                eprintln!("{}", plan.to_sql());
                if let Some(warning) = plan.warning() {
                    eprintln!("{warning}");
                }
                return Err(ForgeError::Validation(
                    "migration not confirmed, review the plan above and re-run with --yes"
                        .to_string(),
                )
                .into());
            }

            let dest_driver = match session.open(&dest.input(), ConnectionSide::Destination).await {
                Ok(driver) => driver,
                Err(e) => {
                    source_driver.close().await;
                    return Err(e.into());
                }
            };

            let outcomes = ops::migrate(
                source_driver.as_ref(),
                dest_driver.as_ref(),
                &request,
                show_progress,
            )
            .await;
            source_driver.close().await;
            dest_driver.close().await;
            let outcomes = outcomes?;

            let failed = outcomes.iter().filter(|o| !o.is_success()).count();
            if failed > 0 {
                warn!("{failed} of {} table(s) failed", outcomes.len());
            }
            print_json(&json!({
                "status": "ok",
                "failed": failed,
                "results": outcomes,
            }))
        }

        Commands::GenerateScript {
            source,
            dest,
            pattern,
            batch_size,
            output,
        } => {
            let source = session.resolve(&source.input(), ConnectionSide::Source)?;
            let dest = session.resolve(&dest.input(), ConnectionSide::Destination)?;
            let options = ScriptOptions {
                batch_size: batch_size.unwrap_or_else(|| session.config.batch_size()),
            };

            let text = script::render_script(&source, &dest, pattern.as_deref(), &options)?;
            write_output(output.as_deref(), &text)?;
            if output.is_some() {
                warn!("the script contains database credentials in cleartext");
            }
            Ok(())
        }

        Commands::Tables { db } => {
            let driver = session.open(&db.input(), ConnectionSide::Database).await?;
            let tables = browse::list_tables(driver.as_ref()).await;
            driver.close().await;
            print_json(&json!({ "status": "ok", "tables": tables? }))
        }

        Commands::Describe { db, table } => {
            let driver = session.open(&db.input(), ConnectionSide::Database).await?;
            let described = ops::describe_table(driver.as_ref(), &table).await;
            driver.close().await;
            print_json(&json!({ "status": "ok", "table": described? }))
        }

        Commands::Rows {
            db,
            table,
            page,
            page_size,
            sort,
            desc,
            search,
        } => {
            let request = browse::PageRequest {
                page,
                page_size,
                sort_column: sort,
                descending: desc,
                search,
            };
            let driver = session.open(&db.input(), ConnectionSide::Database).await?;
            let rows = browse::fetch_page(driver.as_ref(), &table, &request, &session.config).await;
            driver.close().await;
            print_json(&json!({ "status": "ok", "page": rows? }))
        }

        Commands::Insert { db, table, values } => {
            let values = parse_object(&values, "--values")?;
            let driver = session.open(&db.input(), ConnectionSide::Database).await?;
            let affected = browse::insert_row(driver.as_ref(), &table, &values).await;
            driver.close().await;
            print_json(&json!({ "status": "ok", "affected": affected? }))
        }

        Commands::Update {
            db,
            table,
            set,
            predicate,
        } => {
            let set = parse_object(&set, "--set")?;
            let predicate = parse_object(&predicate, "--where")?;
            let driver = session.open(&db.input(), ConnectionSide::Database).await?;
            let affected = browse::update_rows(driver.as_ref(), &table, &set, &predicate).await;
            driver.close().await;
            print_json(&json!({ "status": "ok", "affected": affected? }))
        }

        Commands::Delete {
            db,
            table,
            predicate,
        } => {
            let predicate = parse_object(&predicate, "--where")?;
            let driver = session.open(&db.input(), ConnectionSide::Database).await?;
            let affected = browse::delete_rows(driver.as_ref(), &table, &predicate).await;
            driver.close().await;
            print_json(&json!({ "status": "ok", "affected": affected? }))
        }

        Commands::Backup {
            db,
            pattern,
            output,
        } => {
            let driver = session.open(&db.input(), ConnectionSide::Database).await?;
            let summary = match &output {
                Some(path) => {
                    let file = std::fs::File::create(path)?;
                    let mut writer = std::io::BufWriter::new(file);
                    backup::write_backup(driver.as_ref(), pattern.as_deref(), &mut writer).await
                }
                None => {
                    let mut stdout = std::io::stdout();
                    backup::write_backup(driver.as_ref(), pattern.as_deref(), &mut stdout).await
                }
            };
            driver.close().await;
            let summary = summary?;

            info!(
                "backup finished: {} table(s), {} row(s)",
                summary.tables, summary.rows
            );
            if output.is_some() {
                print_json(&json!({ "status": "ok", "backup": summary }))?;
            }
            Ok(())
        }

        Commands::Query { db, sql } => {
            browse::check_read_only(&sql)?;
            let driver = session.open(&db.input(), ConnectionSide::Database).await?;
            let rows = browse::run_query(driver.as_ref(), &sql).await;
            driver.close().await;
            print_json(&json!({ "status": "ok", "rows": rows? }))
        }
    }
}
