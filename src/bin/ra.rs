use std::ops::Not;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use derive_more::{Display, From};
use reglas::config;
use reglas::display::{report, viz};
use reglas::rules::cluster::DbscanEpsilon;
use reglas::rules::embeddings::SentenceEmbeddingsModelType;
use reglas::rules::model::Rules;
use reglas::rules::similarity::TopK;
use reglas::rules::{AnalysisOptions, analyze, canonicalize};
use tch::Device;

/// ra: A Rule Analyzer
#[derive(Parser)]
#[command(name = "ra")]
#[command(about = "Similarity and clustering analysis over rule datasets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, Default, Display, PartialEq, Eq, Hash, From)]
struct CudaFlag(bool);

impl From<&bool> for CudaFlag {
    fn from(value: &bool) -> Self {
        Self(*value)
    }
}

impl Not for CudaFlag {
    type Output = bool;

    fn not(self) -> Self::Output {
        self.0.not()
    }
}

impl From<CudaFlag> for Device {
    fn from(value: CudaFlag) -> Self {
        if !value {
            Device::Cpu
        } else {
            Device::cuda_if_available()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis over a rule dataset and write reports.
    Analyze {
        /// A .json (array of objects) or .csv file with `rulename`
        /// and `rule_json` columns.
        #[arg(short, long)]
        input: PathBuf,

        /// Neighbors reported per rule.
        #[arg(short = 'k', long = "top-k", default_value_t = 3)]
        top_k: usize,

        /// Similarity at or above which a pair counts as a duplicate.
        #[arg(short, long, default_value_t = 0.9)]
        threshold: f32,

        /// DBSCAN neighborhood radius over cosine distance.
        #[arg(short, long, default_value_t = 0.25)]
        epsilon: f32,

        /// Sentence-embeddings model to encode with.
        #[arg(short, long, value_enum, default_value_t = SentenceEmbeddingsModelType::AllMiniLmL6V2)]
        model_type: SentenceEmbeddingsModelType,

        /// Run the model on CUDA when available.
        #[arg(short, long)]
        cuda: bool,

        /// Where to write reports; defaults to the per-user data dir.
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },

    /// Print each rule's canonical text without running the model.
    Flatten {
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Analyze {
            input,
            top_k,
            threshold,
            epsilon,
            model_type,
            cuda,
            out_dir,
        } => handle_analyze(
            input,
            *top_k,
            *threshold,
            *epsilon,
            *model_type,
            cuda.into(),
            out_dir.clone(),
        ),
        Commands::Flatten { input } => handle_flatten(input),
    }
}

fn handle_analyze(
    input: &PathBuf,
    top_k: usize,
    threshold: f32,
    epsilon: f32,
    model_type: SentenceEmbeddingsModelType,
    cuda: CudaFlag,
    out_dir: Option<PathBuf>,
) -> Result<()> {
    let rules = Rules::from_path(input)?;
    println!("Loaded {} rules from {}", rules.len(), input.display());

    let options = AnalysisOptions {
        top_k: TopK::from(top_k),
        epsilon: DbscanEpsilon::try_new(epsilon)?,
        model_type,
        device: cuda.into(),
    };
    let analysis = analyze(rules, &options)?;

    let out_dir = match out_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            dir
        }
        None => config::get_or_create_report_path(None::<PathBuf>)?,
    };

    for (cluster_id, label) in analysis.cluster_labels.iter() {
        let size = analysis
            .rules
            .iter()
            .filter(|r| r.cluster_id == *cluster_id)
            .count();
        println!("Cluster {} ({} rules): {}", cluster_id, size, label);
    }
    let duplicates = analysis.neighbors.at_least(threshold);
    println!(
        "{} possible duplicate pairs at threshold {}",
        duplicates.len(),
        threshold
    );

    let rule_table = report::write_rule_table(&analysis.rules, out_dir.join("rule_clusters.csv"))?;
    let neighbor_table = report::write_neighbor_report(
        &analysis.neighbors,
        out_dir.join("rule_similarity_report.csv"),
    )?;
    let duplicate_table =
        report::write_duplicates(&analysis.neighbors, threshold, out_dir.join("rule_duplicates.csv"))?;
    let heatmap = viz::plot_similarity_heatmap(
        &analysis.similarity,
        out_dir.join("similarity_heatmap.png"),
        1024,
        896,
        "Similarity Heatmap",
    )?;
    let scatter = viz::plot_projection(
        &analysis.projection,
        &analysis.rules,
        out_dir.join("rule_projection.png"),
        1024,
        896,
        "Rule Clusters",
    )?;

    for written in [rule_table, neighbor_table, duplicate_table, heatmap, scatter] {
        println!("Wrote {}", written.display());
    }
    Ok(())
}

fn handle_flatten(input: &PathBuf) -> Result<()> {
    let rules = Rules::from_path(input)?;
    for (rule, text) in rules.iter().zip(canonicalize(&rules)) {
        println!("{}\t{}", rule.name, text);
    }
    Ok(())
}
