use anyhow::Result;
use skycam_stats::regions::{Region, RegionCatalog};

pub fn list_regions(catalog: &RegionCatalog) -> Result<()> {
    println!("Epoch: {}", catalog.epoch());
    println!("{:<12} {:<14} {:<14} {:<8}", "Region", "X", "Y", "Role");
    println!("{:-<52}", "");

    for region in catalog {
        println!("{}", format_region(region, "stats"));
    }
    println!("{}", format_region(catalog.star_region(), "star"));

    Ok(())
}

fn format_region(region: &Region, role: &str) -> String {
    let x = region.x();
    let y = region.y();
    format!(
        "{:<12} {:<14} {:<14} {:<8}",
        region.name(),
        format!("[{}, {})", x.start, x.end),
        format!("[{}, {})", y.start, y.end),
        role
    )
}
