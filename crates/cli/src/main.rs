use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};

use facesort_core::admin::merge_rename_orchestrator::{MergeOutcome, MergeReport, RenameOutcome};
use facesort_core::config::FacesortConfig;
use facesort_core::detection::domain::face_detector::FaceDetector;
use facesort_core::detection::infrastructure::onnx_yolo_face_detector::OnnxYoloFaceDetector;
use facesort_core::identity::domain::embedding_provider::EmbeddingProvider;
use facesort_core::identity::domain::person::PersonId;
use facesort_core::identity::infrastructure::onnx_arcface_embedder::OnnxArcFaceEmbedder;
use facesort_core::media::infrastructure::image_file_reader::ImageFileReader;
use facesort_core::pipeline::identity_engine::IdentityEngine;
use facesort_core::pipeline::organize_photos_use_case::{OrganizePhotosUseCase, ProgressFn};
use facesort_core::shared::constants::{
    EMBEDDING_MODEL_NAME, EMBEDDING_MODEL_URL, YOLO_MODEL_NAME, YOLO_MODEL_URL,
};
use facesort_core::shared::model_resolver;

const EXIT_OK: i32 = 0;
const EXIT_FAILED: i32 = 1;
const EXIT_PARTIAL: i32 = 2;

/// Sort photos into one folder per person and manage the people found.
#[derive(Parser)]
#[command(name = "facesort", version)]
struct Cli {
    /// Config file (default: platform config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Identity store file, overriding the config.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Intent journal file, overriding the config.
    #[arg(long, global = true)]
    journal: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect faces in every photo of INPUT and file them under OUTPUT.
    Organize {
        input: PathBuf,
        output: PathBuf,

        /// Cosine-similarity threshold for matching a known person (-1.0-1.0).
        #[arg(long)]
        threshold: Option<f64>,

        /// Face detection confidence threshold (0.0-1.0).
        #[arg(long)]
        confidence: Option<f64>,
    },
    /// List every known person.
    List,
    /// Give a person a display name and rename their folder.
    Rename {
        person_id: String,
        new_name: String,

        /// Output directory holding the person folders.
        #[arg(long)]
        output: PathBuf,
    },
    /// Merge SOURCES into TARGET, folders included.
    Merge {
        target_id: String,
        #[arg(required = true)]
        source_ids: Vec<String>,

        /// Output directory holding the person folders.
        #[arg(long)]
        output: PathBuf,
    },
    /// Finish renames and merges interrupted by a crash.
    Recover {
        /// Output directory holding the person folders.
        #[arg(long)]
        output: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(code) => process::exit(code),
        Err(e) => {
            log::error!("{e}");
            eprintln!("Error: {e}");
            process::exit(EXIT_FAILED);
        }
    }
}

fn run() -> Result<i32, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Organize {
            input,
            output,
            threshold,
            confidence,
        } => {
            let mut config = config;
            if let Some(t) = threshold {
                config.similarity_threshold = t;
            }
            if let Some(c) = confidence {
                config.confidence_threshold = c;
            }
            config.validate()?;
            run_organize(&config, &input, &output)
        }
        Command::List => run_list(&config),
        Command::Rename {
            person_id,
            new_name,
            output,
        } => run_rename(&config, &PersonId::new(person_id), &new_name, &output),
        Command::Merge {
            target_id,
            source_ids,
            output,
        } => {
            let sources: Vec<PersonId> = source_ids.into_iter().map(PersonId::new).collect();
            run_merge(&config, &PersonId::new(target_id), &sources, &output)
        }
        Command::Recover { output } => run_recover(&config, &output),
    }
}

fn load_config(cli: &Cli) -> Result<FacesortConfig, Box<dyn std::error::Error>> {
    let mut config = FacesortConfig::load(cli.config.as_deref())?;
    if let Some(ref store) = cli.store {
        config.store_path = store.clone();
    }
    if let Some(ref journal) = cli.journal {
        config.journal_path = journal.clone();
    }
    Ok(config)
}

fn run_organize(
    config: &FacesortConfig,
    input: &Path,
    output: &Path,
) -> Result<i32, Box<dyn std::error::Error>> {
    if !input.is_dir() {
        return Err(format!("Input directory not found: {}", input.display()).into());
    }
    std::fs::create_dir_all(output)?;

    let engine = IdentityEngine::open(config)?;
    let recovery = engine.orchestrator(output).recover()?;
    if !recovery.replayed.is_empty() {
        log::info!("Completed {} interrupted operation(s)", recovery.replayed.len());
    }

    let detector = build_detector(config)?;
    let embedder = build_embedder()?;

    let progress: ProgressFn = Box::new(|current, total| {
        eprint!("\rProcessing photo {current}/{total}");
        true
    });
    let mut use_case = OrganizePhotosUseCase::new(
        Box::new(ImageFileReader::new()),
        detector,
        embedder,
        engine.resolver(),
        engine.store(),
        config.face_padding,
        Some(progress),
    );
    let stats = use_case.execute(input, output)?;
    eprintln!();

    println!("Photos found:        {}", stats.total_files);
    println!("Filed under persons: {}", stats.processed_files);
    println!("Without faces:       {}", stats.no_faces);
    println!("Errors:              {}", stats.errors);
    println!("Faces detected:      {}", stats.faces_detected);
    println!("  new persons:       {}", stats.new_persons);
    println!("  matched:           {}", stats.matched_faces);
    println!("  unrecognized:      {}", stats.unrecognized_faces);
    Ok(EXIT_OK)
}

fn run_list(config: &FacesortConfig) -> Result<i32, Box<dyn std::error::Error>> {
    let engine = IdentityEngine::open(config)?;
    let persons = engine.persons()?;
    if persons.is_empty() {
        println!("No persons yet.");
        return Ok(EXIT_OK);
    }
    for person in &persons {
        println!(
            "{}\t{}\t{} photo(s)",
            person.person_id,
            person.display_name(),
            person.evidence_count()
        );
    }
    let pending = engine.pending_intents();
    if pending > 0 {
        log::warn!("{pending} interrupted operation(s) pending; run `facesort recover`");
    }
    Ok(EXIT_OK)
}

fn run_rename(
    config: &FacesortConfig,
    person_id: &PersonId,
    new_name: &str,
    output: &Path,
) -> Result<i32, Box<dyn std::error::Error>> {
    let engine = IdentityEngine::open(config)?;
    match engine.orchestrator(output).rename(person_id, new_name)? {
        RenameOutcome::Renamed {
            previous_name,
            new_name,
        } => {
            println!("Renamed {person_id}: '{previous_name}' -> '{new_name}'");
            Ok(EXIT_OK)
        }
        RenameOutcome::RecordOnly {
            previous_name,
            new_name,
            error,
        } => {
            println!("Renamed {person_id} to '{new_name}', but folder '{previous_name}' was not renamed: {error}");
            println!("Run `facesort recover --output {}` to retry.", output.display());
            Ok(EXIT_PARTIAL)
        }
        RenameOutcome::Rejected(reason) => {
            eprintln!("Rename rejected: {reason}");
            Ok(EXIT_FAILED)
        }
    }
}

fn run_merge(
    config: &FacesortConfig,
    target_id: &PersonId,
    source_ids: &[PersonId],
    output: &Path,
) -> Result<i32, Box<dyn std::error::Error>> {
    let engine = IdentityEngine::open(config)?;
    match engine.orchestrator(output).merge(target_id, source_ids)? {
        MergeOutcome::Merged(report) => {
            print_merge_report(target_id, &report);
            Ok(EXIT_OK)
        }
        MergeOutcome::Rejected(reason) => {
            eprintln!("Merge rejected: {reason}");
            Ok(EXIT_FAILED)
        }
    }
}

fn print_merge_report(target_id: &PersonId, report: &MergeReport) {
    println!(
        "Merged {} person(s) into {target_id}; {} photo(s) copied, {} embeddings total",
        report.merged.len(),
        report.files_copied,
        report.evidence_count
    );
    for id in &report.missing_records {
        println!("  skipped {id}: not found");
    }
    for folder in &report.missing_folders {
        println!("  no folder '{folder}'");
    }
    for (path, error) in &report.folder_failures {
        println!("  could not move {}: {error}", path.display());
    }
}

fn run_recover(config: &FacesortConfig, output: &Path) -> Result<i32, Box<dyn std::error::Error>> {
    let engine = IdentityEngine::open(config)?;
    let report = engine.orchestrator(output).recover()?;

    for description in &report.replayed {
        println!("Completed {description}");
    }
    for description in &report.still_pending {
        println!("Still pending: {description}");
    }
    if report.other_base_dir > 0 {
        println!(
            "{} operation(s) belong to another output directory",
            report.other_base_dir
        );
    }
    if report.replayed.is_empty() && report.still_pending.is_empty() {
        println!("Nothing to recover.");
    }
    Ok(if report.still_pending.is_empty() {
        EXIT_OK
    } else {
        EXIT_PARTIAL
    })
}

fn build_detector(
    config: &FacesortConfig,
) -> Result<Box<dyn FaceDetector>, Box<dyn std::error::Error>> {
    log::info!("Resolving model: {YOLO_MODEL_NAME}");
    let model_path = model_resolver::resolve(
        YOLO_MODEL_NAME,
        YOLO_MODEL_URL,
        None,
        Some(Box::new(|done: u64, total: u64| {
            download_progress("face detection", done, total)
        })),
    )?;
    Ok(Box::new(OnnxYoloFaceDetector::new(
        &model_path,
        config.confidence_threshold,
    )?))
}

fn build_embedder() -> Result<Box<dyn EmbeddingProvider>, Box<dyn std::error::Error>> {
    log::info!("Resolving model: {EMBEDDING_MODEL_NAME}");
    let model_path = model_resolver::resolve(
        EMBEDDING_MODEL_NAME,
        EMBEDDING_MODEL_URL,
        None,
        Some(Box::new(|done: u64, total: u64| {
            download_progress("face embedding", done, total)
        })),
    )?;
    Ok(Box::new(OnnxArcFaceEmbedder::new(&model_path)?))
}

fn download_progress(model: &str, downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading {model} model... {pct}%");
        if downloaded >= total {
            eprintln!();
        }
    } else {
        eprint!("\rDownloading {model} model... {downloaded} bytes");
    }
}
