//! Correct command - record a human correction into a profile file.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use pricebook_core::models::config::LearningConfig;
use pricebook_core::{InMemoryStore, LearningService, ProfileStore, VendorProfile};

/// Arguments for the correct command.
#[derive(Args)]
pub struct CorrectArgs {
    /// Vendor learning profile file (created if missing)
    #[arg(required = true)]
    profile: PathBuf,

    /// Corrected field: quantity, unitCost, category, or itemDescription
    #[arg(long)]
    field: String,

    /// Value the pipeline extracted
    #[arg(long)]
    original: String,

    /// Value the operator accepted
    #[arg(long)]
    corrected: String,

    /// Confidence to assign the correction (0-1)
    #[arg(long)]
    confidence: Option<f32>,
}

pub async fn run(args: CorrectArgs) -> anyhow::Result<()> {
    let store = Arc::new(InMemoryStore::new());

    // Seed the store from the file when it already exists.
    let mut vendor_id = 1;
    if args.profile.exists() {
        let mut profile: VendorProfile =
            serde_json::from_str(&fs::read_to_string(&args.profile)?)?;
        vendor_id = profile.vendor_id;
        profile.version = 0;
        store.upsert_profile(&profile)?;
    }

    let service = LearningService::new(store.clone(), LearningConfig::default());
    service.record_correction(
        vendor_id,
        &args.field,
        &args.original,
        &args.corrected,
        args.confidence,
    )?;

    let profile = store
        .find_profile(vendor_id)?
        .expect("profile exists after a correction");
    fs::write(&args.profile, serde_json::to_string_pretty(&profile)?)?;

    println!(
        "Recorded {} correction into {}",
        args.field,
        args.profile.display()
    );
    Ok(())
}
