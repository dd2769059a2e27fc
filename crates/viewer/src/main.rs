use scope_viewer::config::ViewerConfig;
use scope_viewer::pipeline;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config = ViewerConfig::from_args(&args)?;
    pipeline::run(config)
}
