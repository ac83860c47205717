//! hostmeshd — a small operator CLI for the replicated host inventory.
//!
//! Unlike a production controller, this binary doesn't wire HostMesh
//! into a discovery provider or an SDN forwarding layer: it exists to
//! start a node and poke at it, or to run an in-process convergence demo,
//! the way `kdelta`'s `start`/`demo`-style subcommands exist to make its
//! own core reachable without standing up a whole application around it.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use hostmesh::prelude::*;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[derive(Parser)]
#[command(name = "hostmeshd")]
#[command(version, about = "Replicated end-station host inventory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a standalone node and serve the gossip protocol on `--bind`.
    ///
    /// The node runs with an empty peer set unless told about others;
    /// this binary has no discovery of its own, so peers must already
    /// know each other's node id out of band (see DESIGN.md).
    Node {
        /// Address to bind the TCP gossip transport on.
        #[arg(short, long, default_value = "127.0.0.1:7979")]
        bind: SocketAddr,
    },

    /// Run a two-node convergence demo entirely in-process.
    ///
    /// Exercises add, move, remove, and anti-entropy fill-in between two
    /// `HostMeshEngine`s wired together over loopback TCP, printing each
    /// event as it's dispatched.
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    hostmesh::init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Node { bind } => run_node(bind).await,
        Commands::Demo => run_demo().await,
    }
}

async fn run_node(bind: SocketAddr) -> Result<()> {
    let (transport, local_addr) = TcpTransport::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    let node_id = NodeId::new();
    let membership = Arc::new(StaticMembership::new(node_id, []));
    let engine = HostMeshEngine::with_default_clock(
        HostMeshConfig::default(),
        transport,
        membership,
    );
    engine.activate().await.context("failed to activate engine")?;

    println!("{}", "hostmeshd node started".bold().green());
    println!("  {} {}", "Node id:".bright_white(), node_id);
    println!("  {} {}", "Address:".bright_white(), local_addr);
    println!();
    println!("{}", "Running. Press Ctrl+C to stop.".bright_black());

    signal::ctrl_c().await.ok();
    println!();
    println!("{}", "Shutting down...".yellow());
    engine.deactivate().await.context("failed to deactivate engine")?;
    println!("{}", "Stopped.".green());
    Ok(())
}

async fn run_demo() -> Result<()> {
    println!("{}", "HostMesh convergence demo".bold().cyan());
    println!();

    let (transport_a, addr_a) = TcpTransport::bind("127.0.0.1:0".parse().unwrap()).await?;
    let (transport_b, addr_b) = TcpTransport::bind("127.0.0.1:0".parse().unwrap()).await?;

    let node_a = NodeId::new();
    let node_b = NodeId::new();
    transport_a.add_peer(node_b, addr_b);
    transport_b.add_peer(node_a, addr_a);

    let membership_a = Arc::new(StaticMembership::new(node_a, [node_b]));
    let membership_b = Arc::new(StaticMembership::new(node_b, [node_a]));

    let config = HostMeshConfig {
        anti_entropy_initial_delay: Duration::from_millis(200),
        anti_entropy_period: Duration::from_millis(500),
        ..HostMeshConfig::default()
    };

    let engine_a =
        Arc::new(HostMeshEngine::with_default_clock(config.clone(), transport_a, membership_a));
    let engine_b =
        Arc::new(HostMeshEngine::with_default_clock(config, transport_b, membership_b));
    engine_a.activate().await?;
    engine_b.activate().await?;

    let mut events_b = engine_b.subscribe_events();
    tokio::spawn(async move {
        while let Some(event) = events_b.recv().await {
            println!(
                "  {} {:?} {} @ {}",
                "[node B]".bright_black(),
                event.kind,
                event.subject.id,
                event.subject.location
            );
        }
    });

    let mac = MacAddress::parse("aa:bb:cc:dd:ee:01").unwrap();
    let vlan = VlanId(10);
    let host_id = HostId::from_parts(mac, vlan);
    let provider = ProviderId::new("demo", "hostmeshd");

    println!("{}", "Node A: adding a host at of:1/1".bright_white());
    engine_a
        .create_or_update_host(
            provider.clone(),
            host_id.clone(),
            HostDescription::new(mac, vlan, ConnectPoint::new("of:1", 1)),
        )
        .await;

    println!("{}", "Node A: moving it to of:2/1".bright_white());
    engine_a
        .create_or_update_host(
            provider,
            host_id.clone(),
            HostDescription::new(mac, vlan, ConnectPoint::new("of:2", 1)),
        )
        .await;

    // Give broadcast a moment, then demonstrate anti-entropy filling a
    // gap: a direct peer-to-peer message "lost" by never broadcasting it,
    // recovered only once the periodic advertisement round runs.
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!();
    println!(
        "{}",
        "Node B's table before anti-entropy has run:".bright_black()
    );
    print_table(&engine_b);

    println!();
    println!(
        "{}",
        "Waiting for the anti-entropy round to reconcile...".bright_black()
    );
    tokio::time::sleep(Duration::from_millis(800)).await;

    println!();
    println!("{}", "Node B's table after convergence:".bright_white());
    print_table(&engine_b);

    engine_a.deactivate().await?;
    engine_b.deactivate().await?;
    Ok(())
}

fn print_table(engine: &HostMeshEngine) {
    let hosts = engine.get_hosts();
    if hosts.is_empty() {
        println!("  {}", "(empty)".bright_black());
        return;
    }
    for host in hosts {
        println!("  {} {} at {}", "*".cyan(), host.id, host.location);
    }
}
