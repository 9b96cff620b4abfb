// robot_world — headless peer instance.
//
// Builds a simulation context, populates the world, binds the local robot's
// server and logs change notifications until killed. Optionally pushes the
// world to the peer and starts driving.
//
// Usage:
//   cargo run -p robot_world_sim -- [-local_port N] [-remote_ip HOST]
//     [-remote_port N] [-name NAME] [-config FILE] [-scenario 1.1]
//     [-sync] [-act] [-log_level LEVEL] [-help]
//
// Flags override values loaded from `-config`.

use std::process::ExitCode;
use std::sync::Arc;

use robot_world_sim::{Notification, Scenario, SimConfig, SimContext, SimError};
use tracing::{debug, error, info, warn};

const USAGE: &str = "\
usage: robot_world [options]
  -local_port N     port this instance listens on (default 12345)
  -remote_ip HOST   peer host (default localhost)
  -remote_port N    peer port (default 12345)
  -name NAME        name of the local robot (default Robot)
  -config FILE      JSON config; flags override it
  -scenario S       one of 1.1 1.2 2.1 2.2 3.1 3.2
  -sync             send world info to the peer at start-up
  -act              start driving at start-up
  -log_level LEVEL  trace, debug, info, warn or error (default info)
  -help             print this text";

/// Values taken from the command line before anything is started.
#[derive(Debug, Default, PartialEq)]
struct Flags {
    config: Option<String>,
    local_port: Option<u16>,
    remote_ip: Option<String>,
    remote_port: Option<u16>,
    name: Option<String>,
    scenario: Option<String>,
    log_level: Option<tracing::Level>,
    sync: bool,
    act: bool,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if has_flag(&args, "-help") {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }
    let flags = match parse_flags(&args) {
        Ok(flags) => flags,
        Err(msg) => {
            eprintln!("robot_world: {msg}");
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    let level = flags.log_level.unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    match run(&flags) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "robot_world failed");
            ExitCode::FAILURE
        }
    }
}

fn parse_flags(args: &[String]) -> Result<Flags, String> {
    Ok(Flags {
        config: parse_flag(args, "-config")?,
        local_port: parse_flag(args, "-local_port")?,
        remote_ip: parse_flag(args, "-remote_ip")?,
        remote_port: parse_flag(args, "-remote_port")?,
        name: parse_flag(args, "-name")?,
        scenario: parse_flag(args, "-scenario")?,
        log_level: parse_flag(args, "-log_level")?,
        sync: has_flag(args, "-sync"),
        act: has_flag(args, "-act"),
    })
}

fn run(flags: &Flags) -> Result<(), SimError> {
    let mut config = match &flags.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    if let Some(port) = flags.local_port {
        config.local_port = port;
    }
    if let Some(ip) = &flags.remote_ip {
        config.remote_ip = ip.clone();
    }
    if let Some(port) = flags.remote_port {
        config.remote_port = port;
    }
    if let Some(name) = &flags.name {
        config.name = name.clone();
    }

    let ctx = SimContext::new(config)?;
    ctx.populate();
    if let Some(arg) = flags.scenario.as_deref() {
        match arg.parse::<Scenario>() {
            Ok(scenario) => {
                ctx.create_scenario(scenario);
            }
            Err(_) => warn!(scenario = arg, "unknown scenario, keeping default layout"),
        }
    }

    let robot = ctx.local_robot()?;
    let port = robot.start_communicating()?;
    info!(
        robot = %robot.as_string(),
        port,
        peer = %format!("{}:{}", ctx.config().remote_ip, ctx.config().remote_port),
        "instance up"
    );

    let notifications = ctx.subscribe();
    if flags.sync {
        let reply = robot.send_world_info();
        info!(reply = %reply.message_type(), "world sync sent");
    }
    if flags.act {
        robot.start_acting()?;
    }

    log_notifications(&ctx, notifications);
    robot.shutdown();
    Ok(())
}

/// Log every notification until the notifier goes away.
fn log_notifications(ctx: &Arc<SimContext>, notifications: std::sync::mpsc::Receiver<Notification>) {
    for notification in notifications {
        match notification {
            Notification::WorldChanged => {
                info!(world = %ctx.world().as_debug_string(), "world changed");
            }
            Notification::RobotChanged(id) => {
                if let Some(robot) = ctx.world().robot(id) {
                    debug!(%robot, "robot changed");
                }
            }
        }
    }
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

/// Value following `flag`, parsed. `Ok(None)` when the flag is absent; an
/// error when it has no value or the value does not parse.
fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Result<Option<T>, String> {
    let Some(i) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    let value = args
        .get(i + 1)
        .ok_or_else(|| format!("{flag} needs a value"))?;
    value
        .parse()
        .map(Some)
        .map_err(|_| format!("bad value for {flag}: {value:?}"))
}
