use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use paperbert::search::SearchMode;

#[derive(Debug, Parser)]
#[command(
    name = "paperbert",
    about = "Cross-lingual hybrid search for your local paper library"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the embedding model ID or local model path
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage local paper directories
    Root {
        #[command(subcommand)]
        action: RootAction,
    },
    /// Show or change persistent settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Scan sources and build the metadata index
    BuildIndex(BuildIndexArgs),
    /// Encode indexed papers into the vector index
    BuildEmbeddings(BuildEmbeddingsArgs),
    /// Search the library
    Search(SearchArgs),
    /// Find papers similar to an indexed paper
    Similar(SimilarArgs),
    /// Show index status and statistics
    Status(StatusArgs),
    /// Write the readable Markdown catalogue of indexed papers
    Catalog(CatalogArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Root subcommands --

#[derive(Debug, Subcommand)]
pub enum RootAction {
    /// Register a directory of papers under a name
    Add {
        /// Path to the directory
        path: PathBuf,
        /// Name used in provenance and --root filters
        #[arg(long)]
        name: String,
    },
    /// Unregister a directory (indexed papers go on the next build)
    Remove {
        /// Name of the root to remove
        name: String,
    },
    /// List all registered roots
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Config subcommands --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show every setting with its effective value
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting in config.redb
    Set {
        /// Setting key
        key: String,
        /// New value
        value: String,
    },
    /// Clear a stored setting (revert to default)
    Unset {
        /// Setting key
        key: String,
    },
}

// -- Builds --

#[derive(Debug, Parser)]
pub struct BuildIndexArgs {
    /// Only extract new or changed papers
    #[arg(long)]
    pub incremental: bool,

    /// Ignore the reference-manager metadata store for this build
    #[arg(long)]
    pub no_store: bool,
}

#[derive(Debug, Parser)]
pub struct BuildEmbeddingsArgs {
    /// Only encode papers whose title or abstract changed
    #[arg(long)]
    pub incremental: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// A second phrasing of the query, e.g. in the papers' language
    #[arg(long)]
    pub also: Option<String>,

    /// Number of results to return
    #[arg(short = 'n', long = "top", default_value = "10")]
    pub top: usize,

    /// Ranking channels to use
    #[arg(long, value_enum, default_value_t = SearchMode::Hybrid)]
    pub mode: SearchMode,

    /// Only return papers found under this root ("store" for the
    /// metadata store)
    #[arg(long)]
    pub root: Option<String>,

    /// Derive the second phrasing from the term translation dictionary
    #[arg(long)]
    pub translate: bool,

    /// Ignore keyword matches on papers without a marked abstract
    #[arg(long)]
    pub no_fallback: bool,

    /// Give up after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct SimilarArgs {
    /// Paper reference: #id, title or file name fragment
    pub reference: String,

    /// Number of results to return
    #[arg(short = 'n', long = "top", default_value = "10")]
    pub top: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Number of most frequent keywords to list
    #[arg(long, default_value = "30")]
    pub top_keywords: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Catalogue --

#[derive(Debug, Parser)]
pub struct CatalogArgs {
    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "paperbert",
            &mut std::io::stdout(),
        );
    }
}
