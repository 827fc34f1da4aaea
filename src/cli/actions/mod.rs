pub mod run;

use crate::exporter::options::ExporterOptions;

#[derive(Debug)]
pub enum Action {
    Run {
        port: u16,
        listen: Option<String>,
        options: ExporterOptions,
    },
}
