//! Stand-in for `snabb lwaftr` used by the harness integration tests.
//!
//! Honours the argument contracts of the real subcommands without moving
//! any packets: `check` copies each input capture to its output, `run`
//! idles until SIGTERM, `monitor`/`loadtest` print canned output.
//!
//! Setting `FAKE_AFTR_FAIL` to a subcommand name (or `all`) makes that
//! subcommand exit 1.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};

const FAIL_VAR: &str = "FAKE_AFTR_FAIL";

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn on_sigterm(_: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

/// Present while a `run` daemon with this pid is up and configured.
fn ready_marker(pid: u32) -> PathBuf {
    std::env::temp_dir().join(format!("fake-aftr-{pid}.ready"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("lwaftr") => {}
        other => bail!("Unknown program: {other:?}"),
    }
    let subcommand = args.next().context("Missing subcommand")?;
    let rest: Vec<String> = args.collect();

    if let Ok(fail) = std::env::var(FAIL_VAR) {
        if fail == "all" || fail == subcommand {
            bail!("{subcommand} failing on request");
        }
    }

    tracing::debug!(%subcommand, args = ?rest, "fake-aftr invoked");
    match subcommand.as_str() {
        "check" => check(&rest),
        "soaktest" => soaktest(&rest),
        "run" => run(&rest),
        "query" => query(&rest),
        "monitor" => monitor(&rest),
        "loadtest" => loadtest(&rest),
        other => bail!("Unknown subcommand: {other}"),
    }
}

type Flags<'a> = Vec<(&'a str, Option<&'a str>)>;

/// Split `args` into flags (with their values, for those listed in
/// `valued`) and positionals.
fn split_args<'a>(args: &'a [String], valued: &[&str]) -> Result<(Flags<'a>, Vec<&'a str>)> {
    let mut flags = Vec::new();
    let mut positional = Vec::new();
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        if arg.starts_with('-') {
            let value = if valued.contains(&arg.as_str()) {
                Some(
                    it.next()
                        .with_context(|| format!("Missing {arg} value"))?
                        .as_str(),
                )
            } else {
                None
            };
            flags.push((arg.as_str(), value));
        } else {
            positional.push(arg.as_str());
        }
    }
    Ok((flags, positional))
}

fn flag<'a>(flags: &[(&str, Option<&'a str>)], name: &str) -> Option<Option<&'a str>> {
    flags.iter().find(|(f, _)| *f == name).map(|(_, v)| *v)
}

fn require_file(path: &str) -> Result<()> {
    if !Path::new(path).is_file() {
        bail!("No such file: {path}");
    }
    Ok(())
}

fn parse_secs(value: Option<&str>) -> Result<Duration> {
    let raw = value.context("Missing duration")?;
    let secs: f64 = raw.parse().with_context(|| format!("Bad duration {raw}"))?;
    Ok(Duration::from_secs_f64(secs.max(0.0)))
}

fn check(args: &[String]) -> Result<()> {
    let (flags, pos) = split_args(args, &[])?;
    let &[conf, v4_in, v6_in, v4_out, v6_out, counters] = pos.as_slice() else {
        bail!("check expects 6 arguments, got {}", pos.len());
    };
    require_file(conf)?;
    for (src, dst) in [(v4_in, v4_out), (v6_in, v6_out)] {
        fs::copy(src, dst).with_context(|| format!("copying {src} to {dst}"))?;
    }
    if flag(&flags, "-r").is_some() {
        fs::write(counters, "return {\n}\n")
            .with_context(|| format!("writing counters {counters}"))?;
    } else {
        require_file(counters)?;
    }
    Ok(())
}

fn soaktest(args: &[String]) -> Result<()> {
    let (flags, pos) = split_args(args, &["-D", "--duration"])?;
    let duration = flag(&flags, "-D").or_else(|| flag(&flags, "--duration"));
    let duration = parse_secs(duration.flatten())?;
    let &[conf, v4_in, v6_in] = pos.as_slice() else {
        bail!("soaktest expects 3 arguments, got {}", pos.len());
    };
    for path in [conf, v4_in, v6_in] {
        require_file(path)?;
    }
    thread::sleep(duration);
    Ok(())
}

fn run(args: &[String]) -> Result<()> {
    let (flags, _) = split_args(
        args,
        &[
            "--conf",
            "--v4",
            "--v6",
            "--on-a-stick",
            "--mirror",
            "--bench-file",
            "--name",
            "--duration",
        ],
    )?;
    let conf = flag(&flags, "--conf").flatten().context("Missing --conf")?;
    require_file(conf)?;
    let dual = flag(&flags, "--v4").is_some() && flag(&flags, "--v6").is_some();
    if !dual && flag(&flags, "--on-a-stick").is_none() {
        bail!("run needs --v4 and --v6, or --on-a-stick");
    }

    if let Some(d) = flag(&flags, "--duration") {
        thread::sleep(parse_secs(d)?);
        return Ok(());
    }
    if let Some(Some(mirror)) = flag(&flags, "--mirror") {
        tracing::info!(%mirror, "mirroring enabled");
    }

    // SAFETY: the handler only stores to an atomic, which is
    // async-signal-safe.
    unsafe {
        libc::signal(libc::SIGTERM, on_sigterm as libc::sighandler_t);
    }
    let marker = ready_marker(std::process::id());
    fs::write(&marker, b"").with_context(|| format!("writing {}", marker.display()))?;
    while RUNNING.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(20));
    }
    let _ = fs::remove_file(&marker);
    Ok(())
}

/// A pid names a live lwAFTR if it exists and is not a zombie.
fn alive(pid: &str) -> bool {
    let Ok(pid) = pid.parse::<u32>() else {
        return false;
    };
    let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // `pid (comm) S ...`; comm may itself contain parentheses.
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.trim_start().chars().next())
        .is_some_and(|state| state != 'Z')
}

fn query(args: &[String]) -> Result<()> {
    match args {
        [pid] if alive(pid) && pid.parse().is_ok_and(|p| ready_marker(p).exists()) => Ok(()),
        _ => bail!("No running lwAFTR instance for {args:?}"),
    }
}

fn monitor(args: &[String]) -> Result<()> {
    let (_, pos) = split_args(args, &["--name"])?;
    let &[action, pid] = pos.as_slice() else {
        bail!("monitor expects ACTION PID");
    };
    if !alive(pid) {
        bail!("No running lwAFTR instance with pid {pid}");
    }
    if action != "all" {
        bail!("Unsupported monitor action: {action}");
    }
    println!("Mirror address set to 255.255.255.255");
    Ok(())
}

fn loadtest(args: &[String]) -> Result<()> {
    let (flags, pos) = split_args(
        args,
        &["--bench-file", "--program", "--step", "--duration", "--bitrate"],
    )?;
    let duration = parse_secs(flag(&flags, "--duration").flatten())?;
    if pos.is_empty() || pos.len() % 4 != 0 {
        bail!("loadtest expects CAPTURE SRC DST IFACE tuples");
    }
    let streams: Vec<&[&str]> = pos.chunks(4).collect();
    for stream in &streams {
        require_file(stream[0])?;
    }

    let steps = 6;
    for step in 1..=steps {
        let rate = step as f64 * 0.1;
        for stream in &streams {
            println!(
                "{}: {} -> {} on {}: applying {:.1} Gbps",
                stream[0], stream[1], stream[2], stream[3], rate
            );
        }
        thread::sleep(duration / steps);
    }
    Ok(())
}
