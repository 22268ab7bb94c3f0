use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use cbk_runtime::SettlementManager;
use cbk_schemas::{Correction, MaterialId, StaffSalary, Vessel};
use cbk_sources::erp::{ErpClient, ErpConfig, ErpIds};

#[derive(Parser)]
#[command(name = "cbk")]
#[command(about = "counterbook settlement ledger CLI", long_about = None)]
struct Cli {
    /// Layered YAML config paths in merge order; empty = builtin dataset.
    #[arg(long = "config", global = true)]
    config_paths: Vec<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash,

    /// Show the settlement the next submission would cover
    Prepare,

    /// List recent settlements with headline P&L figures
    History {
        #[arg(long, default_value_t = 30)]
        limit: usize,
    },

    /// Print one settlement in full
    Show {
        /// Settlement id
        #[arg(long, conflicts_with = "date")]
        id: Option<String>,

        /// Calendar date (YYYY-MM-DD) the settlement period covers
        #[arg(long)]
        date: Option<String>,
    },

    /// Apply authorized corrections to a persisted settlement
    Amend {
        /// Settlement id
        #[arg(long)]
        id: String,

        /// Acting identity; must match the configured privileged actor
        #[arg(long)]
        actor: String,

        /// Corrections as a JSON array (avoid on Windows; quoting is annoying)
        #[arg(long, conflicts_with = "corrections_file")]
        corrections: Option<String>,

        /// Path to a JSON file holding the corrections array
        #[arg(long = "corrections-file", conflicts_with = "corrections")]
        corrections_file: Option<String>,
    },

    /// Vessel registry
    Vessel {
        #[command(subcommand)]
        cmd: VesselCmd,
    },

    /// Staff salary roster
    Salary {
        #[command(subcommand)]
        cmd: SalaryCmd,
    },

    /// Record a counter expense
    Expense {
        #[arg(long)]
        amount: f64,

        /// One of: police, supplies, transport, other
        #[arg(long)]
        category: String,

        #[arg(long, default_value = "")]
        description: String,
    },

    /// Record a time-scoped material cost
    Cost {
        #[arg(long)]
        material_id: u32,

        #[arg(long)]
        cost_per_unit: f64,

        /// Effective-from instant (RFC 3339); defaults to now
        #[arg(long)]
        effective_from: Option<String>,
    },

    /// Audit log utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply SQL migrations
    Migrate,
}

#[derive(Subcommand)]
enum VesselCmd {
    List,
    Save {
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
        /// Key into the catalog's liquid density table
        #[arg(long)]
        liquid_type: String,
        #[arg(long, default_value = "")]
        location: String,
        #[arg(long)]
        tare_kg: f64,
    },
}

#[derive(Subcommand)]
enum SalaryCmd {
    List,
    Save {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        role: String,
        #[arg(long)]
        monthly_salary: f64,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Verify the audit log's hash chain
    Verify {
        #[arg(long, default_value = "audit/settlements.jsonl")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let cli = Cli::parse();

    let path_refs: Vec<&str> = cli.config_paths.iter().map(|s| s.as_str()).collect();
    let loaded = cbk_catalog::loader::load_layered_yaml(&path_refs)?;

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = cbk_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = cbk_db::status(&pool).await?;
                    println!("db_ok={} has_settlements_table={}", s.ok, s.has_settlements_table);
                }
                DbCmd::Migrate => {
                    cbk_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash => {
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Prepare => {
            let manager = manager(&loaded).await?;
            let preview = manager.prepare(Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
        }

        Commands::History { limit } => {
            let manager = manager(&loaded).await?;
            let rows = manager.history(limit).await?;
            for s in rows {
                println!(
                    "{} {} {} by={} revenue={:.2} net={:.2} adjusted={:.2} discrepancy={:.2} amendments={}",
                    s.settled_at.to_rfc3339(),
                    s.id,
                    s.status.as_str(),
                    s.settled_by,
                    s.revenue_total,
                    s.net_profit,
                    s.adjusted_net_profit,
                    s.discrepancy_value,
                    s.amendment_count,
                );
            }
        }

        Commands::Show { id, date } => {
            let manager = manager(&loaded).await?;
            let settlement = match (id, date) {
                (Some(id), _) => {
                    let id = Uuid::parse_str(&id).context("invalid settlement id uuid")?;
                    manager.get(id).await?
                }
                (None, Some(date)) => {
                    let date: NaiveDate = date.parse().context("invalid date, want YYYY-MM-DD")?;
                    manager.get_by_date(date).await?
                }
                (None, None) => anyhow::bail!("provide --id or --date"),
            };
            println!("{}", serde_json::to_string_pretty(&settlement)?);
        }

        Commands::Amend {
            id,
            actor,
            corrections,
            corrections_file,
        } => {
            let raw = match (corrections, corrections_file) {
                (Some(json), _) => json,
                (None, Some(path)) => fs::read_to_string(&path)
                    .with_context(|| format!("read corrections-file failed: {path}"))?,
                (None, None) => anyhow::bail!("provide --corrections or --corrections-file"),
            };
            let corrections: Vec<Correction> =
                serde_json::from_str(raw.trim()).context("corrections must be a JSON array")?;

            let manager = manager(&loaded).await?;
            let id = Uuid::parse_str(&id).context("invalid settlement id uuid")?;
            let result = manager.amend(id, corrections, &actor, Utc::now()).await?;

            println!("amended=true settlement_id={id}");
            println!("net_profit={:.2}", result.settlement.net_profit);
            println!("adjusted_net_profit={:.2}", result.settlement.adjusted_net_profit);
            println!("downstream_affected={}", result.downstream_affected);
            if result.downstream_affected {
                println!("note: a later settlement already opened from this record's old closing stock; re-amend it by hand if needed");
            }
        }

        Commands::Vessel { cmd } => {
            let manager = manager(&loaded).await?;
            match cmd {
                VesselCmd::List => {
                    for v in manager.vessels().await? {
                        println!(
                            "{} name={:?} liquid={} location={} tare_kg={}",
                            v.code, v.name, v.liquid_type, v.location, v.tare_kg
                        );
                    }
                }
                VesselCmd::Save {
                    code,
                    name,
                    liquid_type,
                    location,
                    tare_kg,
                } => {
                    manager
                        .save_vessel(&Vessel {
                            code: code.clone(),
                            name,
                            liquid_type,
                            location,
                            tare_kg,
                        })
                        .await?;
                    println!("vessel_saved=true code={code}");
                }
            }
        }

        Commands::Salary { cmd } => {
            let manager = manager(&loaded).await?;
            match cmd {
                SalaryCmd::List => {
                    for s in manager.salaries().await? {
                        println!("{} role={} monthly={:.2}", s.name, s.role, s.monthly_salary);
                    }
                }
                SalaryCmd::Save {
                    name,
                    role,
                    monthly_salary,
                } => {
                    manager
                        .save_salary(&StaffSalary {
                            name: name.clone(),
                            role,
                            monthly_salary,
                            active: true,
                        })
                        .await?;
                    println!("salary_saved=true name={name}");
                }
            }
        }

        Commands::Expense {
            amount,
            category,
            description,
        } => {
            let manager = manager(&loaded).await?;
            manager
                .record_expense(&cbk_schemas::ExpenseEntry {
                    amount,
                    category,
                    description,
                    recorded_at: Utc::now(),
                })
                .await?;
            println!("expense_recorded=true amount={amount:.2}");
        }

        Commands::Cost {
            material_id,
            cost_per_unit,
            effective_from,
        } => {
            let effective = match effective_from {
                Some(s) => s
                    .parse()
                    .context("invalid effective-from, want RFC 3339")?,
                None => Utc::now(),
            };
            let manager = manager(&loaded).await?;
            manager
                .record_material_cost(MaterialId(material_id), cost_per_unit, effective)
                .await?;
            println!("cost_recorded=true material_id={material_id} cost_per_unit={cost_per_unit}");
        }

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Verify { path } => match cbk_audit::verify_chain(&path)? {
                cbk_audit::ChainStatus::Intact { events } => {
                    println!("chain_intact=true events={events}");
                }
                cbk_audit::ChainStatus::Broken { line, reason } => {
                    println!("chain_intact=false line={line} reason={reason}");
                    std::process::exit(1);
                }
            },
        },
    }

    Ok(())
}

/// Wire a manager over Postgres and the configured ERP. Commands that
/// never reach the ERP work without the API key being set.
async fn manager(loaded: &cbk_catalog::loader::LoadedConfig) -> Result<SettlementManager> {
    let settings = loaded.bundle.settings.clone();
    let catalog = loaded.bundle.catalog.clone();

    let pool = cbk_db::connect_from_env().await?;
    let store = Arc::new(cbk_db::PgStore::new(pool));

    let api_key = std::env::var(&settings.erp.api_key_env).unwrap_or_default();
    let erp = Arc::new(ErpClient::new(
        ErpConfig {
            url: settings.erp.url.clone(),
            db: settings.erp.db.clone(),
            uid: settings.erp.uid,
            api_key,
        },
        ErpIds::default(),
        catalog.fallback_costs.clone(),
    ));

    let audit_path =
        std::env::var("CBK_AUDIT_LOG").unwrap_or_else(|_| "audit/settlements.jsonl".to_string());
    let audit = cbk_audit::AuditLog::open(&audit_path)?;

    let erp_for_sales: Arc<ErpClient> = Arc::clone(&erp);
    let sales: Arc<dyn cbk_sources::SalesSource> = erp_for_sales;
    let erp_for_purchases: Arc<ErpClient> = Arc::clone(&erp);
    let purchases: Arc<dyn cbk_sources::PurchaseSource> = erp_for_purchases;

    Ok(SettlementManager::new(
        store, sales, purchases, erp, audit, catalog, settings,
    ))
}
