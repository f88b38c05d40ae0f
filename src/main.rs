use phantom_pyramid::{PhantomConfig, PhantomOrchestrator};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::var_os("PHANTOM_CONFIG") {
        Some(path) => PhantomConfig::from_path(path).expect("should have loaded PHANTOM_CONFIG"),
        None => PhantomConfig::default(),
    };
    let orchestrator = PhantomOrchestrator::new(config).expect("configuration should be valid");

    for report in orchestrator
        .generate_all(".")
        .expect("should have generated every preset")
    {
        println!(
            "{}: levels {:?}, codes {:?}, metadata {}",
            report.store.display(),
            report.levels.iter().map(|level| level.shape).collect::<Vec<_>>(),
            report.codes,
            report.metadata.display()
        );
    }
}
