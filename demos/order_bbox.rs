use anyhow::Result;
use nsidc_order::{BoundingBox, Client, SpatialFilter, TemporalRange};
use std::path::Path;

fn main() -> Result<()> {
    // Example program that calls the library API.
    // Configure Earthdata Login via env vars or a `.nsidcrc` file.
    let client = Client::from_env()?.with_progress(true);

    let temporal = TemporalRange::parse("2020-01-01", "2020-01-02")?;
    let spatial = SpatialFilter::BoundingBox(BoundingBox::new(-100.0, 30.0, -90.0, 40.0)?);

    let report = client.order(temporal, spatial, Path::new("data"))?;
    for page in &report.pages {
        println!("page {}: {} ({})", page.page, page.outcome, page.order_id);
    }
    println!("{} file(s) extracted", report.extracted_files().count());
    Ok(())
}
