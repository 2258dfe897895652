//! Images command implementation.

use std::io::Write;

use anyhow::Result;
use clap::Args;
use policy_core::annotations;
use serde::Serialize;

use super::OutputFormat;
use crate::context::Context;
use crate::ui::{human_size, Ui};

/// Arguments for the images command.
#[derive(Args, Debug)]
pub struct ImagesArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

/// One row of the listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageRow {
    reference: String,
    digest: String,
    size: u64,
    media_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    created: Option<String>,
}

/// Lists every tagged reference in the local store.
///
/// # Errors
///
/// Returns an error if the store cannot be opened.
pub fn run<W: Write>(args: &ImagesArgs, ctx: &Context, ui: &mut Ui<W>) -> Result<()> {
    let store = ctx.open_store()?;
    let rows: Vec<ImageRow> = store
        .list()
        .into_iter()
        .map(|(reference, descriptor)| ImageRow {
            reference,
            created: descriptor.annotations.get(annotations::CREATED).cloned(),
            digest: descriptor.digest.to_string(),
            size: descriptor.size,
            media_type: descriptor.media_type.to_string(),
        })
        .collect();

    match args.output {
        OutputFormat::Json => ui.json(&rows),
        OutputFormat::Text => {
            let cells: Vec<Vec<String>> = rows
                .iter()
                .map(|row| {
                    vec![
                        row.reference.clone(),
                        short_digest(&row.digest).to_string(),
                        human_size(row.size),
                        row.media_type.clone(),
                        row.created.clone().unwrap_or_default(),
                    ]
                })
                .collect();
            ui.table(&["REFERENCE", "DIGEST", "SIZE", "MEDIA TYPE", "CREATED"], &cells);
        }
    }
    Ok(())
}

fn short_digest(digest: &str) -> &str {
    let hex = digest.split_once(':').map_or(digest, |(_, hex)| hex);
    &hex[..hex.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_core::MediaType;

    fn seeded() -> (tempfile::TempDir, Context, String) {
        let root = tempfile::tempdir().unwrap();
        let ctx = Context::for_store(root.path());
        let mut store = ctx.open_store().unwrap();
        let layer = store
            .put(MediaType::layer(), &b"bundle"[..], None)
            .unwrap()
            .with_annotation(annotations::CREATED, "2024-01-01T00:00:00Z");
        let hex = layer.digest.hex().to_string();
        store.tag("opcr.io/acme/policy:1.0.0", layer).unwrap();
        store.save().unwrap();
        (root, ctx, hex)
    }

    #[test]
    fn test_images_table() {
        let (_root, ctx, hex) = seeded();
        let mut ui = Ui::new(Vec::new());

        run(&ImagesArgs { output: OutputFormat::Text }, &ctx, &mut ui).unwrap();

        let out = String::from_utf8(ui.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].starts_with("REFERENCE"));
        assert!(lines[1].starts_with("opcr.io/acme/policy:1.0.0"));
        assert!(lines[1].contains(&hex[..12]));
        assert!(!lines[1].contains(&hex[..13]));
        assert!(lines[1].contains("6 B"));
        assert!(lines[1].ends_with("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_images_json() {
        let (_root, ctx, hex) = seeded();
        let mut ui = Ui::new(Vec::new());

        run(&ImagesArgs { output: OutputFormat::Json }, &ctx, &mut ui).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&ui.into_inner()).unwrap();
        assert_eq!(value[0]["reference"], "opcr.io/acme/policy:1.0.0");
        assert_eq!(value[0]["digest"], format!("sha256:{hex}"));
        assert_eq!(value[0]["mediaType"], MediaType::OCI_LAYER_TAR_GZIP);
        assert_eq!(value[0]["size"], 6);
    }

    #[test]
    fn test_short_digest() {
        assert_eq!(short_digest("sha256:0123456789abcdef"), "0123456789ab");
        assert_eq!(short_digest("abc"), "abc");
    }
}
