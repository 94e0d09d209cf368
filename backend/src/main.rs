//! rulemap CLI - apply column mapping rules to delimited files
//!
//! # Main Commands
//!
//! ```bash
//! rulemap transform clients.csv --rules TRANS_REL.xlsx   # Map rows to the target columns
//! rulemap serve                                          # Start HTTP server (port 3000)
//! rulemap template list                                  # Manage rule set templates
//! ```
//!
//! # Helper Commands
//!
//! ```bash
//! rulemap compile TRANS_REL.xlsx      # Print the compiled rule set as JSON
//! rulemap inspect clients.csv         # Show encoding, delimiter and headers
//! rulemap kinds                       # Show accepted transformation types
//! rulemap validate-llm                # Check the LLM endpoint configuration
//! ```

use clap::{Parser, Subcommand};
use rulemap::api::logs::LOG_BROADCASTER;
use rulemap::parser::format_delimiter;
use rulemap::{
    kinds_description, load_rules, load_template, parse_file_auto, AiClient, HeaderCase, LoadReport,
    RuleSetRegistry, StrategyKind, TransformOptions,
};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rulemap")]
#[command(about = "Apply column mapping rules to delimited files", long_about = None)]
struct Cli {
    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform an input file with a rule set
    Transform {
        /// Input file (delimited text)
        input: PathBuf,

        /// Rule source: .xlsx workbook, mapping CSV or compiled JSON
        #[arg(short, long, required_unless_present = "template", conflicts_with = "template")]
        rules: Option<PathBuf>,

        /// Lookup CSV for a mapping CSV rule source
        #[arg(short, long)]
        lookups: Option<PathBuf>,

        /// Use a stored template (id or name) instead of a rule source
        #[arg(short, long)]
        template: Option<String>,

        /// Output CSV file
        #[arg(short, long, default_value = rulemap::DEFAULT_OUTPUT)]
        output: PathBuf,

        /// Input delimiter (auto-detect if not specified)
        #[arg(short, long)]
        delimiter: Option<char>,

        /// Header normalization for input and rule columns
        #[arg(long, value_enum, default_value_t = HeaderCase::AsIs)]
        header_case: HeaderCase,

        /// Strategy for custom and autogenerate rules
        #[arg(short, long, value_enum, default_value_t = StrategyKind::Deterministic)]
        strategy: StrategyKind,

        /// Write an empty row for each failed input row
        #[arg(long)]
        align_failed_rows: bool,

        /// Save the rules as a template under this name
        #[arg(long, conflicts_with = "template")]
        save_template: Option<String>,
    },

    /// Compile a rule source to rule set JSON
    Compile {
        /// Rule source: .xlsx workbook or mapping CSV
        rules: PathBuf,

        /// Lookup CSV for a mapping CSV rule source
        #[arg(short, long)]
        lookups: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show what the parser detects in an input file
    Inspect {
        /// Input file (delimited text)
        input: PathBuf,

        /// Input delimiter (auto-detect if not specified)
        #[arg(short, long)]
        delimiter: Option<char>,

        /// Header normalization
        #[arg(long, value_enum, default_value_t = HeaderCase::AsIs)]
        header_case: HeaderCase,
    },

    /// Show the accepted transformation types
    Kinds,

    /// Check the LLM endpoint configured in the environment
    ValidateLlm,

    /// Start HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Manage rule set templates
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// List all stored templates
    List,

    /// Store a rule source or compiled rule set JSON as a template
    Import {
        /// Rule set JSON, .xlsx workbook or mapping CSV
        file: PathBuf,
        /// Lookup CSV for a mapping CSV
        #[arg(short, long)]
        lookups: Option<PathBuf>,
        /// Name for the template
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Show details of a template
    Show {
        /// Template id or name
        id: String,
    },

    /// Delete a template
    Delete {
        /// Template id
        id: String,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    LOG_BROADCASTER.set_quiet(cli.quiet);

    let result = match cli.command {
        Commands::Transform {
            input,
            rules,
            lookups,
            template,
            output,
            delimiter,
            header_case,
            strategy,
            align_failed_rows,
            save_template,
        } => {
            let options = TransformOptions {
                delimiter,
                header_case,
                strategy,
                output: Some(output),
                align_failed_rows,
                template_id: None,
                save_template,
                registry_dir: None,
            };
            cmd_transform(&input, rules.as_deref(), lookups.as_deref(), template.as_deref(), options).await
        }

        Commands::Compile { rules, lookups, output } => cmd_compile(&rules, lookups.as_deref(), output.as_deref()),

        Commands::Inspect {
            input,
            delimiter,
            header_case,
        } => cmd_inspect(&input, delimiter, header_case),

        Commands::Kinds => {
            println!("{}", kinds_description());
            Ok(())
        }

        Commands::ValidateLlm => cmd_validate_llm().await,

        Commands::Serve { port } => rulemap::server::start_server(port).await.map_err(Box::<dyn std::error::Error>::from),

        Commands::Template { action } => cmd_template(action),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

async fn cmd_transform(
    input: &Path,
    rules: Option<&Path>,
    lookups: Option<&Path>,
    template: Option<&str>,
    mut options: TransformOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let rule_set = match (template, rules) {
        (Some(id), _) => {
            let (id, rule_set) = load_template(id, None)?;
            options.template_id = Some(id);
            rule_set
        }
        (None, Some(path)) => {
            let loaded = load_rules(path, lookups)?;
            print_warnings(&loaded);
            loaded.rule_set
        }
        (None, None) => return Err("either --rules or --template is required".into()),
    };

    eprintln!("📄 Processing: {}", input.display());
    let report = rulemap::transform_csv(input, rule_set, options).await?;

    eprintln!("\n⚙️  {}", report.summary);
    for failure in report.failures.iter().take(5) {
        eprintln!("   ❌ Row {}: {}", failure.row, failure.message);
    }
    if report.failures.len() > 5 {
        eprintln!("   ... and {} more", report.failures.len() - 5);
    }

    if let Some(path) = &report.output_path {
        eprintln!("💾 Output written to: {}", path.display());
    }
    if let Some(id) = &report.template_id {
        eprintln!("   Template: {}", id);
    }

    eprintln!("\n✨ Done!");
    Ok(())
}

fn cmd_compile(rules: &Path, lookups: Option<&Path>, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let loaded = load_rules(rules, lookups)?;
    print_warnings(&loaded);

    let json = loaded.rule_set.to_json()?;
    write_output(&json, output)
}

fn cmd_inspect(input: &Path, delimiter: Option<char>, header_case: HeaderCase) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Inspecting: {}", input.display());

    let result = parse_file_auto(input, delimiter, header_case)?;

    println!("Encoding: {}", result.encoding);
    println!(
        "Delimiter: '{}'{}",
        format_delimiter(result.delimiter),
        if delimiter.is_none() { " (auto-detected)" } else { "" }
    );
    println!("Rows: {}", result.records.len());
    println!("Columns: {}", result.headers.join(", "));

    let registry = RuleSetRegistry::new();
    let compatible = registry.find_compatible(&result.headers);
    if !compatible.is_empty() {
        println!("\nMatching templates:");
        for (template, score) in compatible {
            println!("  📄 {} ({}) - {:.0}% of its columns present", template.name, template.id, score * 100.0);
        }
    }

    Ok(())
}

async fn cmd_validate_llm() -> Result<(), Box<dyn std::error::Error>> {
    let client = AiClient::from_env()?;
    client.validate_connection().await?;
    eprintln!("✅ LLM configuration OK");
    Ok(())
}

fn print_warnings(loaded: &LoadReport) {
    if loaded.warnings.is_empty() {
        return;
    }
    eprintln!("⚠️  {} rule row(s) skipped:", loaded.warnings.len());
    for warning in &loaded.warnings {
        eprintln!("   - {}", warning);
    }
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}

fn cmd_template(action: TemplateAction) -> Result<(), Box<dyn std::error::Error>> {
    let mut registry = RuleSetRegistry::new();

    match action {
        TemplateAction::List => {
            let templates = registry.list();
            if templates.is_empty() {
                eprintln!("📋 No templates stored yet.");
                eprintln!("   Use 'rulemap template import <file>' to add one.");
                return Ok(());
            }

            eprintln!("📋 Stored templates ({}):\n", templates.len());
            for t in templates {
                println!("  📄 {} ({})", t.name, t.id);
                println!("     Rules: {}", t.rule_set.len());
                println!("     Source columns: {}", t.source_columns.join(", "));
                println!("     Success rate: {:.0}%", t.success_rate * 100.0);
                println!("     Uses: {}", t.use_count);
                if let Some(last) = t.last_used {
                    println!("     Last used: {}", last);
                }
                println!();
            }
        }

        TemplateAction::Import { file, lookups, name } => {
            eprintln!("📥 Importing template from: {}", file.display());

            let is_json = file.extension().is_some_and(|e| e.eq_ignore_ascii_case("json"));
            let id = if is_json {
                registry.import(&file, name.as_deref())?
            } else {
                let loaded = load_rules(&file, lookups.as_deref())?;
                print_warnings(&loaded);
                let name = name
                    .as_deref()
                    .or_else(|| file.file_stem().and_then(|s| s.to_str()))
                    .unwrap_or("imported");
                registry.save(loaded.rule_set, name)?
            };
            eprintln!("✅ Template saved with ID: {}", id);
        }

        TemplateAction::Show { id } => {
            let t = registry.resolve(&id)?;
            println!("📄 Template: {} ({})\n", t.name, t.id);
            println!("Source columns: {}", t.source_columns.join(", "));
            println!("Target columns: {}", t.rule_set.target_columns().join(", "));
            println!("Created: {}", t.created_at);
            println!("Success rate: {:.0}%", t.success_rate * 100.0);
            println!("Uses: {}", t.use_count);
            println!("\nRule set:");
            println!("{}", t.rule_set.to_json()?);
        }

        TemplateAction::Delete { id } => {
            registry.delete(&id)?;
            eprintln!("🗑️  Template deleted: {}", id);
        }
    }

    Ok(())
}
