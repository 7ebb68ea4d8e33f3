use clap::{Parser, Subcommand};
use shroud::cli::{
    default_output_path, format_migration, migrate_tree, mirror_tree, obfuscate_file, reveal_file,
    FileOptions, MigrateOptions, MirrorOptions, RevealOptions,
};
use shroud::transform::UnitOutput;
use std::path::PathBuf;
use std::process::ExitCode;

/// Version info from build.rs
const VERSION: &str = env!("SHROUD_VERSION");
const BUILD: &str = env!("SHROUD_BUILD");
const PROFILE: &str = env!("SHROUD_PROFILE");
const GIT_HASH: &str = env!("SHROUD_GIT_HASH");

fn get_version() -> &'static str {
    use std::sync::OnceLock;
    static VERSION_STRING: OnceLock<String> = OnceLock::new();
    VERSION_STRING.get_or_init(|| format!("{} {} build {} ({})", PROFILE, VERSION, BUILD, GIT_HASH))
}

#[derive(Parser)]
#[command(name = "shroud")]
#[command(author, about = "Reversible obfuscation of PHP source trees", long_about = None)]
struct Cli {
    /// Print version
    #[arg(short = 'V', long)]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Obfuscate a tree in place, keeping the original as <tree>_backup
    #[command(alias = "m")]
    Migrate {
        /// Plain source tree
        plain: PathBuf,

        /// Dependency manifest (default: composer.json beside the tree)
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Seed for alias selection
        #[arg(long)]
        seed: Option<u64>,

        /// Leave the staging tree on disk if the run fails before promotion
        #[arg(long)]
        keep_staging: bool,

        /// Path is a package root; obfuscate its src/ and patch its composer.json
        #[arg(long)]
        package: bool,
    },

    /// Write an obfuscated copy of a tree elsewhere
    Mirror {
        source: PathBuf,
        dest: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Obfuscate a single source file
    #[command(alias = "f")]
    File {
        input: PathBuf,

        /// Output file (default: <name>.obfuscated.<ext>)
        output: Option<PathBuf>,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        seed: Option<u64>,

        /// Also write the matching revert unit
        #[arg(long)]
        revert_unit: Option<PathBuf>,
    },

    /// Decode an obfuscated file
    Reveal {
        input: PathBuf,

        /// Output file (default: stdout)
        output: Option<PathBuf>,

        /// Configuration holding the alias table the file was built with
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.version {
        println!("shroud {}", get_version());
        return ExitCode::SUCCESS;
    }

    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            use clap::CommandFactory;
            if Cli::command().print_help().is_err() {
                return ExitCode::FAILURE;
            }
            println!();
            return ExitCode::SUCCESS;
        }
    };

    let result = match command {
        Commands::Migrate {
            plain,
            manifest,
            config,
            seed,
            keep_staging,
            package,
        } => {
            let options = MigrateOptions {
                config,
                manifest,
                seed,
                keep_staging,
                package,
            };
            migrate_tree(&plain, &options).map(|report| print!("{}", format_migration(&report)))
        }

        Commands::Mirror {
            source,
            dest,
            config,
            seed,
        } => {
            let options = MirrorOptions { config, seed };
            mirror_tree(&source, &dest, &options).map(|report| {
                println!(
                    "Mirrored {} units to {} ({} copied, {} passed through)",
                    report.obfuscated.len(),
                    dest.display(),
                    report.copied.len(),
                    report.notes.len()
                );
            })
        }

        Commands::File {
            input,
            output,
            config,
            seed,
            revert_unit,
        } => {
            let output = output.unwrap_or_else(|| default_output_path(&input));
            let options = FileOptions {
                config,
                seed,
                revert_unit,
            };
            obfuscate_file(&input, &output, &options).map(|unit| match unit {
                UnitOutput::Obfuscated(_) => println!("Obfuscated to {}", output.display()),
                UnitOutput::PassThrough { rejection, .. } => {
                    println!("{}: {}; copied to {}", input.display(), rejection, output.display())
                }
            })
        }

        Commands::Reveal {
            input,
            output,
            config,
        } => {
            let options = RevealOptions { config };
            reveal_file(&input, output.as_deref(), &options).map(|plain| match &output {
                Some(path) => println!("Revealed to {}", path.display()),
                None => print!("{}", plain),
            })
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_irrecoverable() => {
            eprintln!("FATAL: {}", e);
            eprintln!("The source tree is not in place. Restore it from the backup by hand.");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
