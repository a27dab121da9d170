use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use facelens_core::gallery::display_name;
use facelens_core::{enroll_face, imageio, Annotator, FacePipeline, Gallery, ModelManifest};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "facelens", version, about = "Face detection and recognition from the command line")]
struct Cli {
    #[command(flatten)]
    paths: Paths,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Paths {
    /// Directory holding the ONNX models
    #[arg(long, global = true, env = "FACELENS_MODEL_DIR", default_value = "models")]
    model_dir: PathBuf,

    /// Identity gallery root
    #[arg(long, global = true, env = "FACELENS_GALLERY_DIR", default_value = "known_faces_db")]
    gallery_dir: PathBuf,

    /// TrueType font for face labels
    #[arg(long, global = true, env = "FACELENS_FONT_PATH")]
    font: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect and name every face in an image
    Analyze {
        image: PathBuf,
        /// Write the annotated image here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Add a reference image for a person
    Enroll {
        /// Person's name (e.g., "Jane Doe")
        #[arg(short, long)]
        name: String,
        image: PathBuf,
        /// Face region as top,right,bottom,left; the whole image if omitted
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        location: Option<Vec<i32>>,
    },
    /// Name pre-cropped face images, one identity per file
    Recognize {
        #[arg(required = true)]
        crops: Vec<PathBuf>,
    },
    /// Verify the model files are present
    CheckModels,
    /// List enrolled identities
    Gallery,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze { image, output } => {
            let mut pipeline = load_pipeline(&cli.paths)?;
            let bytes = read(&image)?;
            let analysis = pipeline.analyze(&bytes)?;

            println!("{}", serde_json::to_string_pretty(&json!({ "faces": analysis.faces }))?);
            if let Some(output) = output {
                std::fs::write(&output, &analysis.processed_image)
                    .with_context(|| format!("cannot write {}", output.display()))?;
                eprintln!("annotated image written to {}", output.display());
            }
        }
        Commands::Enroll {
            name,
            image,
            location,
        } => {
            let location = match location.as_deref() {
                None => None,
                Some(&[top, right, bottom, left]) => Some([top, right, bottom, left]),
                Some(_) => bail!("--location takes exactly four values: top,right,bottom,left"),
            };
            let gallery = Gallery::open(&cli.paths.gallery_dir)?;
            enroll_face(&gallery, &name, &read(&image)?, location)?;
            println!("Saved '{name}' successfully.");
        }
        Commands::Recognize { crops } => {
            let mut pipeline = load_pipeline(&cli.paths)?;
            let encoded = crops
                .iter()
                .map(|path| read(path).map(|bytes| imageio::encode_base64(&bytes)))
                .collect::<Result<Vec<_>>>()?;

            for (path, record) in crops.iter().zip(pipeline.recognize_batch(&encoded)) {
                println!("{}\t{}\t{}", record.index, path.display(), display_name(&record.name));
            }
        }
        Commands::CheckModels => {
            let manifest = ModelManifest::verify(&cli.paths.model_dir)?;
            for (name, path) in &manifest.detectors {
                println!("detector  {name:<12} {}", path.display());
            }
            println!("embedder  {:<12} {}", "arcface", manifest.embedder.display());
            if manifest.detectors.len() < 2 {
                println!("no fallback detector; detection has a single backend");
            }
        }
        Commands::Gallery => {
            let gallery = Gallery::open(&cli.paths.gallery_dir)?;
            let identities = gallery.identities()?;
            if identities.is_empty() {
                println!("No identities enrolled in {}", gallery.root().display());
            }
            for identity in identities {
                println!(
                    "{:<24} {:>3} reference(s)",
                    display_name(&identity.name),
                    identity.references.len()
                );
            }
        }
    }

    Ok(())
}

fn load_pipeline(paths: &Paths) -> Result<FacePipeline> {
    tracing::debug!(models = %paths.model_dir.display(), gallery = %paths.gallery_dir.display(), "loading pipeline");
    let manifest = ModelManifest::verify(&paths.model_dir)?;
    let gallery = Gallery::open(&paths.gallery_dir)?;
    let annotator = match &paths.font {
        Some(font) => Annotator::with_font_file(font)?,
        None => Annotator::new(),
    };
    Ok(FacePipeline::from_manifest(&manifest, gallery, Arc::new(annotator))?)
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))
}
