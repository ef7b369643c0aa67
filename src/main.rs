use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use xvdscope::bat::BatSummary;
use xvdscope::container::{OpenOptions, XvdFile};
use xvdscope::hash_tree::HashTreeShape;
use xvdscope::layout::RegionKind;
use xvdscope::logging;

#[derive(Parser)]
#[command(name = "xvdscope", about = "Inspect XVD virtual-disk containers")]
struct Cli {
    /// Keep going when the header fails validation
    #[arg(long, global = true)]
    permissive: bool,
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header identity fields, flags and region layout
    Info {
        input: PathBuf,
        /// Print a JSON document instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show the offset and length of every region
    Layout {
        input: PathBuf,
    },
    /// Run every header check and the file size cross-check
    Validate {
        input: PathBuf,
    },
    /// Write one region verbatim to a file
    Extract {
        input: PathBuf,
        /// embedded-container, mutable-metadata, hash-tree, user-data,
        /// vm-config, dynamic-header or drive
        #[arg(short, long)]
        region: RegionKind,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Extract the embedded container
    ExtractExvd {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Extract the user data region
    ExtractUdat {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let opts = OpenOptions { permissive: cli.permissive };

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json } => {
            let mut xvd = XvdFile::open_with(&input, opts)?;
            let info    = xvd.info();
            let layout  = xvd.layout();
            let tree    = xvd.resolver().hash_tree_shape();

            if json {
                let doc = serde_json::json!({
                    "path":   input.display().to_string(),
                    "valid":  xvd.is_valid(),
                    "validation_error": xvd.validation_error().map(ToString::to_string),
                    "header": info,
                    "layout": layout.as_ref().ok(),
                    "layout_error": layout.as_ref().err().map(ToString::to_string),
                });
                println!("{}", serde_json::to_string_pretty(&doc)?);
                return Ok(());
            }

            println!("── XVD ──────────────────────────────────────────────────");
            println!("  Path            {}", input.display());
            println!("  Container type  {}", info.container_type);
            println!("  Content type    {}", info.content_type);
            println!("  Format version  {}", info.format_version);
            println!("  Content ID      {}", info.content_id);
            println!("  User ID         {}", info.user_id);
            println!("  Product ID      {}", info.product_id);
            println!("  PDUID           {}", info.pduid);
            println!("  Sandbox         {}", info.sandbox);
            println!("  Package version {}", info.package_version);
            println!("  Min sys version {}", info.min_system_version);
            println!("  Created         {}", info.creation_time.as_deref().unwrap_or("-"));
            println!("  ODK keyslot     {}", info.odk_keyslot);
            println!("  Signed          {}", info.signed);
            println!("  Drive size      {:#x}", info.drive_size);
            println!("  Sector size     {:#x}", info.sector_size);
            println!("  Platforms       {}", join_or_dash(&info.platforms));
            println!("  Flags           {}", join_or_dash(&info.flags));
            if info.reserved_flag_bits != 0 {
                println!("  Reserved bits   {:#x}", info.reserved_flag_bits);
            }
            println!("  Root hash       {}", info.root_hash);
            match tree {
                Ok(Some(shape)) => println!("  Hash tree       {}", describe_tree(&shape)),
                Ok(None)        => println!("  Hash tree       none (integrity disabled)"),
                Err(e)          => println!("  Hash tree       unavailable: {e}"),
            }
            match layout {
                Ok(layout) => {
                    if let Some(bat) = &layout.bat {
                        println!("  {}", describe_bat(bat));
                    }
                    print_regions(&layout.regions);
                }
                Err(e) => println!("  Layout          unavailable: {e}"),
            }
            if let Some(err) = xvd.validation_error() {
                println!("  Validation      FAILED: {err}");
            }
        }

        // ── Layout ───────────────────────────────────────────────────────────
        Commands::Layout { input } => {
            let mut xvd = XvdFile::open_with(&input, opts)?;
            let layout  = xvd.layout()?;
            println!("{} container, {} regions", layout.container_type.name(), layout.regions.len());
            if let Some(bat) = &layout.bat {
                println!("  {}", describe_bat(bat));
            }
            print_regions(&layout.regions);
            println!("  Expected size {:#x} / actual {:#x}", layout.expected_file_size, xvd.file_size());
            for anomaly in &layout.anomalies {
                println!("  note: {anomaly}");
            }
        }

        // ── Validate ─────────────────────────────────────────────────────────
        Commands::Validate { input } => {
            let xvd = XvdFile::open_with(&input, OpenOptions { permissive: true })?;
            match xvd.validation_error() {
                None => println!("{}: OK ({:#x} bytes)", input.display(), xvd.file_size()),
                Some(e) => {
                    println!("{}: INVALID: {e}", input.display());
                    std::process::exit(1);
                }
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, region, output } => {
            extract(&input, opts, region, &output)?;
        }
        Commands::ExtractExvd { input, output } => {
            extract(&input, opts, RegionKind::EmbeddedContainer, &output)?;
        }
        Commands::ExtractUdat { input, output } => {
            extract(&input, opts, RegionKind::UserData, &output)?;
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn extract(input: &Path, opts: OpenOptions, kind: RegionKind, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut xvd = XvdFile::open_with(input, opts)?;
    let written = xvd.extract_region(kind, output)?;
    println!("Extracted {kind} ({written} bytes) -> {}", output.display());
    Ok(())
}

fn print_regions(regions: &[xvdscope::RegionDescriptor]) {
    println!("  {:<20} {:>18} {:>18} {:>18}", "Region", "Offset", "Length", "End");
    for r in regions {
        let end = r.offset.saturating_add(r.length);
        let mark = if r.is_absent() { "  (absent)" } else { "" };
        println!("  {:<20} {:>#18x} {:>#18x} {:>#18x}{mark}", r.kind.name(), r.offset, r.length, end);
    }
}

fn describe_tree(shape: &HashTreeShape) -> String {
    let levels: Vec<String> = shape.level_pages[..shape.depth].iter().map(u64::to_string).collect();
    let copies = if shape.resilient { " x2 (resilient)" } else { "" };
    format!("{} pages [{}]{copies}", shape.total_pages(), levels.join(", "))
}

fn describe_bat(bat: &BatSummary) -> String {
    let highest = bat.highest_entry.map_or_else(|| "-".to_owned(), |h| format!("{h:#x}"));
    format!(
        "BAT             {} of {} blocks allocated, highest entry {highest}",
        bat.allocated, bat.total_entries
    )
}

fn join_or_dash(items: &[&str]) -> String {
    if items.is_empty() { "-".into() } else { items.join(", ") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helper_output_is_ascii() {
        let shape = xvdscope::hash_tree::tree_shape(800, true).unwrap();
        let tree = describe_tree(&shape);
        assert_eq!(tree, "12 pages [5, 1] x2 (resilient)");

        let bat = BatSummary { allocated: 3, total_entries: 10, highest_entry: Some(2) };
        assert!(describe_bat(&bat).contains("3 of 10 blocks allocated, highest entry 0x2"));
        let empty = BatSummary { allocated: 0, total_entries: 4, highest_entry: None };
        assert!(describe_bat(&empty).ends_with("highest entry -"));

        assert_eq!(join_or_dash(&[]), "-");
        for s in [tree, describe_bat(&bat), join_or_dash(&["PC", "Gen9"])] {
            assert!(s.is_ascii(), "{s}");
        }
    }
}
