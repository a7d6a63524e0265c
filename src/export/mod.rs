mod csv_exporter;
mod report;

pub use csv_exporter::CsvExporter;
pub use report::render_statistics;
