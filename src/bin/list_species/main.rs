use clap::Parser;
use fv3_ics::species::MERRA2_AEROSOLS;
use tabled::{settings::Style, Table};

/// Print the MERRA-2 species that can be added to the model tracers.
#[derive(Debug, clap::Parser)]
struct Cli {
    /// Only list these MERRA-2 species.
    species: Vec<String>,
}

fn main() {
    let clargs = Cli::parse();
    let rows = MERRA2_AEROSOLS
        .iter()
        .filter(|m| clargs.species.is_empty() || clargs.species.iter().any(|s| s == m.source_id));
    let mut table = Table::new(rows);
    table.with(Style::psql());
    println!("{table}");
}
