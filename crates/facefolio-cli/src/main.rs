use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facefolio_core::analysis::{analyze, draw_overlay};
use facefolio_core::{
    compute_transform, Capabilities, CollageSession, DetectionCache, ImageRasterizer, ImageRef,
    LabelMode, Layout, LumaKeyRemover, PhotoLibrary, Status, ZoomTarget,
};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod collage;
mod config;
mod sidecar;

use collage::Collage;
use config::Config;
use sidecar::{sidecar_path, Sidecar, SidecarDetector};

#[derive(Parser)]
#[command(name = "facefolio", about = "Face photo collage composer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List layouts and their slot counts
    Layouts,
    /// Build a collage from a TOML description and save it as PNG
    Compose {
        /// Collage description file
        collage: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Facial proportion analysis from a 68-point landmark file
    Analyze {
        image: PathBuf,
        /// Landmark JSON with a `points` array (default: the image's sidecar)
        #[arg(short, long)]
        landmarks: Option<PathBuf>,
        /// Write the image with guide lines drawn on it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the zoom transform for an image using its landmark sidecar
    Zoom {
        image: PathBuf,
        #[arg(short, long, default_value = "face")]
        target: ZoomTarget,
        #[arg(short, long, default_value = "two-col")]
        layout: Layout,
        #[arg(short, long, default_value_t = 0)]
        slot: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Layouts => {
            for layout in Layout::ALL {
                println!("{:<16} {} slots", layout.id(), layout.slot_count());
            }
        }
        Commands::Compose { collage, output } => compose(&config, &collage, &output).await?,
        Commands::Analyze {
            image,
            landmarks,
            output,
        } => {
            let landmarks =
                landmarks.unwrap_or_else(|| sidecar_path(&image, &config.sidecar_suffix));
            analyze_face(&image, &landmarks, output.as_deref()).await?;
        }
        Commands::Zoom {
            image,
            target,
            layout,
            slot,
        } => zoom(&config, &image, target, layout, slot).await?,
    }

    Ok(())
}

async fn load_image(path: &Path) -> Result<DynamicImage> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || image::open(owned))
        .await?
        .with_context(|| format!("failed to open image {}", path.display()))
}

async fn compose(config: &Config, collage_path: &Path, output: &Path) -> Result<()> {
    let src = tokio::fs::read_to_string(collage_path)
        .await
        .with_context(|| format!("failed to read {}", collage_path.display()))?;
    let collage = Collage::parse(&src)
        .with_context(|| format!("invalid collage description {}", collage_path.display()))?;
    let base_dir = collage_path.parent().map(Path::to_path_buf).unwrap_or_default();

    let caps = Capabilities {
        detector: Arc::new(SidecarDetector::new(&base_dir, config.sidecar_suffix.clone())),
        background_remover: Arc::new(LumaKeyRemover {
            tolerance: config.key_tolerance,
        }),
        rasterizer: Arc::new(ImageRasterizer),
    };
    let mut session = CollageSession::new(caps, collage.layout)
        .with_photos(PhotoLibrary::new(collage.photos.clone()))
        .with_options(config.render_options());

    let mut status = session.subscribe();
    let progress = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            if let Status::Processing(text) = current {
                eprintln!("{text}");
            }
        }
    });

    // Global zoom first: setting it clears per-slot overrides.
    session.set_zoom(collage.zoom).await;

    for entry in &collage.slots {
        let image = load_image(&base_dir.join(&entry.image)).await?;
        session.assign(entry.slot, ImageRef::new(entry.image.clone(), image))?;
        for _ in 0..entry.quarter_turns % 4 {
            session.rotate_quarter(entry.slot)?;
        }
        session.set_fine_rotation(entry.slot, entry.fine_rotation)?;
        if let Some(zoom) = entry.zoom {
            session.select_slot(entry.slot)?;
            session.set_zoom(zoom).await;
            session.clear_selection();
        }
    }

    let scanned = session.reconcile().await;
    tracing::info!(scanned, "landmark scan finished");
    for slot in 0..session.slot_count() {
        if let Some(ai) = session.ai_status(slot) {
            tracing::info!(slot, status = ?ai, "detection");
        }
    }

    for kind in &collage.edits {
        let report = session.run_batch(*kind).await;
        println!(
            "{kind}: {} applied, {} skipped, {} failed",
            report.applied, report.skipped, report.failed
        );
    }

    session.set_border(collage.border);
    match collage.labels {
        LabelMode::None => {}
        LabelMode::BeforeAfter => {
            session.toggle_before_after();
            if !collage.show_original {
                session.flip_comparison();
            }
        }
        LabelMode::Date => {
            session.toggle_date();
        }
    }

    let mut png = None;
    session.finalize(|bytes| png = Some(bytes)).await?;
    // Closing the status channel ends the progress task.
    drop(session);
    let _ = progress.await;

    let Some(bytes) = png else {
        bail!("renderer produced no output");
    };
    tokio::fs::write(output, &bytes)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("wrote {} ({} bytes)", output.display(), bytes.len());
    Ok(())
}

async fn analyze_face(image_path: &Path, landmarks: &Path, output: Option<&Path>) -> Result<()> {
    let json = tokio::fs::read_to_string(landmarks)
        .await
        .with_context(|| format!("failed to read landmarks {}", landmarks.display()))?;
    let sidecar = Sidecar::parse(&json)
        .with_context(|| format!("invalid landmark file {}", landmarks.display()))?;
    let analysis = analyze(&sidecar.points).context("landmark file has no usable 68-point shape")?;

    println!("{}", serde_json::to_string_pretty(&analysis)?);

    if let Some(output) = output {
        let image = load_image(image_path).await?;
        draw_overlay(&image, &analysis)
            .save(output)
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("wrote {}", output.display());
    }
    Ok(())
}

async fn zoom(
    config: &Config,
    image_path: &Path,
    target: ZoomTarget,
    layout: Layout,
    slot: usize,
) -> Result<()> {
    if slot >= layout.slot_count() {
        bail!("layout {layout} has {} slots, got slot {slot}", layout.slot_count());
    }

    let image = load_image(image_path).await?;
    let image = ImageRef::new(image_path.to_string_lossy(), image);
    let cache = DetectionCache::new(Arc::new(SidecarDetector::new(
        PathBuf::new(),
        config.sidecar_suffix.clone(),
    )));
    let landmarks = cache.ensure(slot, &image).await;
    let transform = compute_transform(layout, slot, target, Some(&landmarks), 0.0);

    let report = serde_json::json!({
        "image": image.handle(),
        "layout": layout,
        "slot": slot,
        "target": target,
        "landmarks": landmarks,
        "transform": transform,
        "css": transform.css(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
