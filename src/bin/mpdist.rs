use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{error, info, warn};
use mpdist::{
    config::{CLIENT_QUEUE_RINGSIZE, MAX_PORTS, MAX_WORKERS, MBUFS_PER_PORT, MBUFS_PER_WORKER, MBUF_DATA_SIZE, PACKET_READ_SIZE},
    distribute::BackoffIdle,
    init::{initialize, ProcessType, Role},
    ports::{parse_portmask, PortDriver},
    DistConfig, DistError, Distributor, PortId, RegistryConfig, ResourceRegistry, Result,
    ShmRegistry, SoftPortDriver, Worker,
};

fn main() {
    env_logger::init();

    let matches = build_cli().get_matches();
    if let Err(e) = dispatch(&matches) {
        error!("{}", e);
        eprintln!("mpdist: {}", e);
        if e.is_missing_owner() {
            eprintln!("mpdist: is a primary process running in this namespace?");
        }
        std::process::exit(1);
    }
}

fn build_cli() -> Command {
    Command::new("mpdist")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Distribute packets from network ports to worker processes over shared memory")
        .arg(
            Arg::new("proc_type")
                .long("proc-type")
                .value_name("TYPE")
                .help("primary, secondary or auto")
                .default_value("auto")
                .global(true),
        )
        .arg(
            Arg::new("namespace")
                .long("namespace")
                .value_name("NAME")
                .help("Shared memory namespace")
                .default_value("mpdist")
                .global(true),
        )
        .arg(
            Arg::new("shm_dir")
                .long("shm-dir")
                .value_name("DIR")
                .help("Directory holding namespaces (default /dev/shm)")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("portmask")
                .short('p')
                .long("portmask")
                .value_name("MASK")
                .help("Hex mask of ports to use (primary)")
                .global(true),
        )
        .arg(
            Arg::new("num_workers")
                .short('n')
                .long("num-workers")
                .value_name("COUNT")
                .help("Number of worker processes (primary)")
                .value_parser(value_parser!(usize))
                .global(true),
        )
        .arg(
            Arg::new("worker_index")
                .long("worker-index")
                .value_name("INDEX")
                .help("Ring to consume (secondary)")
                .value_parser(value_parser!(usize))
                .global(true),
        )
        .arg(
            Arg::new("soft_ports")
                .long("soft-ports")
                .value_name("COUNT")
                .help("Ports exposed by the software driver")
                .value_parser(value_parser!(u16))
                .default_value("2")
                .global(true),
        )
        .arg(
            Arg::new("frames")
                .long("frames")
                .value_name("COUNT")
                .help("Stop generating after this many frames per port")
                .value_parser(value_parser!(u64))
                .global(true),
        )
        .subcommand(Command::new("run").about("Run as owner or worker (default)"))
        .subcommand(Command::new("list").about("List resources published in the namespace"))
        .subcommand(
            Command::new("purge")
                .about("Remove a namespace left behind by a dead owner")
                .arg(
                    Arg::new("force")
                        .long("force")
                        .help("Purge even if the owner is still running")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("info").about("Show version and compile-time limits"))
}

fn dispatch(matches: &ArgMatches) -> Result<()> {
    // global args are propagated down, so the innermost matches see them all
    let args = matches.subcommand().map_or(matches, |(_, sub)| sub);
    let registry_config = registry_config(args);
    match matches.subcommand() {
        Some(("list", _)) => list(&registry_config),
        Some(("purge", sub)) => purge(&registry_config, sub.get_flag("force")),
        Some(("info", _)) => show_info(),
        Some(("run", _)) | None => run(args, registry_config),
        Some((other, _)) => Err(DistError::invalid_parameter(
            "command",
            format!("unknown command '{}'", other),
        )),
    }
}

fn registry_config(matches: &ArgMatches) -> RegistryConfig {
    let namespace = matches
        .get_one::<String>("namespace")
        .cloned()
        .unwrap_or_else(|| "mpdist".to_string());
    let config = RegistryConfig::new(namespace);
    match matches.get_one::<PathBuf>("shm_dir") {
        Some(dir) => config.with_base_dir(dir.clone()),
        None => config,
    }
}

fn run(matches: &ArgMatches, registry_config: RegistryConfig) -> Result<()> {
    let process_type: ProcessType = matches
        .get_one::<String>("proc_type")
        .map(String::as_str)
        .unwrap_or("auto")
        .parse()?;
    let process_type = process_type.resolve(&registry_config);
    let role = Role::from_process_type(process_type, matches.get_one::<usize>("worker_index").copied())?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::Relaxed))
        .map_err(|e| DistError::platform(format!("Cannot install signal handler: {}", e)))?;

    let soft_ports = matches.get_one::<u16>("soft_ports").copied().unwrap_or(2);
    let mut driver = SoftPortDriver::new(soft_ports);
    if let Some(&frames) = matches.get_one::<u64>("frames") {
        driver = driver.with_frame_budget(frames);
    }

    match role {
        Role::Owner => run_owner(matches, registry_config, driver, &running),
        Role::Attacher { .. } => run_worker(role, registry_config, driver, &running),
    }
}

fn run_owner(
    matches: &ArgMatches,
    registry_config: RegistryConfig,
    mut driver: SoftPortDriver,
    running: &AtomicBool,
) -> Result<()> {
    let mask = matches
        .get_one::<String>("portmask")
        .ok_or_else(|| DistError::invalid_parameter("portmask", "The primary needs -p/--portmask"))?;
    let workers = *matches
        .get_one::<usize>("num_workers")
        .ok_or_else(|| DistError::invalid_parameter("num-workers", "The primary needs -n/--num-workers"))?;
    let ports = parse_portmask(mask, &driver.available_ports())?;

    let config = DistConfig::builder().workers(workers).ports(ports).build()?;
    let registry = ShmRegistry::create(registry_config)?;

    let outcome = initialize(Role::Owner, &config, &registry, &mut driver).and_then(|handles| {
        let mut distributor = Distributor::new(&handles)?;
        let stats = distributor.run(&mut driver, &mut BackoffIdle::default(), running);
        info!("Distributed {} frames, dropped {}", stats.rx, stats.rx_drop);
        for client in distributor.clients() {
            info!(
                "  worker {}: rx {} drop {}",
                client.worker_index(),
                client.stats().rx(),
                client.stats().rx_drop()
            );
        }
        Ok(())
    });

    let removed = registry.teardown()?;
    info!("Removed {} shared memory files", removed);
    outcome
}

fn run_worker(
    role: Role,
    registry_config: RegistryConfig,
    mut driver: SoftPortDriver,
    running: &AtomicBool,
) -> Result<()> {
    let registry = ShmRegistry::attach(registry_config)?;
    let handles = initialize(role, &DistConfig::default(), &registry, &mut driver)?;
    let mut worker = Worker::new(&handles)?;

    let mut per_port: BTreeMap<PortId, u64> = BTreeMap::new();
    let total = worker.run(
        |port, _frame| *per_port.entry(port).or_default() += 1,
        &mut BackoffIdle::default(),
        running,
    )?;

    info!("Worker {} handled {} frames", worker.worker_index(), total);
    for (port, count) in &per_port {
        info!("  port {}: {}", port, count);
    }
    Ok(())
}

fn list(registry_config: &RegistryConfig) -> Result<()> {
    let registry = ShmRegistry::attach(registry_config.clone())?;
    let entries = registry.entries()?;

    println!(
        "Namespace '{}' (owner pid {}), {} resources",
        registry_config.namespace,
        registry.owner_pid(),
        entries.len()
    );
    for entry in entries {
        println!(
            "  {:<24} {:<12} {:>12} bytes  pid {:<8} age {}s",
            entry.name,
            entry.kind.label(),
            entry.size,
            entry.creator_pid,
            entry.age_seconds().unwrap_or(0)
        );
    }
    Ok(())
}

fn purge(registry_config: &RegistryConfig, force: bool) -> Result<()> {
    let removed = if force {
        if let Some(pid) = ShmRegistry::live_owner(registry_config) {
            warn!("Purging namespace '{}' while pid {} runs", registry_config.namespace, pid);
        }
        ShmRegistry::purge(registry_config)?
    } else {
        ShmRegistry::purge_stale(registry_config)?
    };
    println!("Removed {} files from {}", removed, registry_config.namespace_dir().display());
    Ok(())
}

fn show_info() -> Result<()> {
    println!("mpdist {}", env!("CARGO_PKG_VERSION"));

    println!("\nLimits:");
    println!("  Max ports:            {}", MAX_PORTS);
    println!("  Max workers:          {}", MAX_WORKERS);
    println!("  Buffers per worker:   {}", MBUFS_PER_WORKER);
    println!("  Buffers per port:     {}", MBUFS_PER_PORT);
    println!("  Buffer data size:     {}", MBUF_DATA_SIZE);
    println!("  Worker ring size:     {}", CLIENT_QUEUE_RINGSIZE);
    println!("  Burst size:           {}", PACKET_READ_SIZE);

    println!("\nShared objects:");
    println!("  {}", mpdist::names::MZ_PORT_INFO);
    println!("  {}", mpdist::names::PKTMBUF_POOL_NAME);
    println!("  {}", mpdist::names::rx_queue_name(0));

    Ok(())
}
