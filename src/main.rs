use anyhow::Context;
use clap::{Parser, Subcommand};
use fuse3::MountOptions;
use fuse3::path::Session;
use futures_util::future::poll_fn;
use snapfix::config::{Config, DEFAULT_POLL_INTERVAL, default_snapshot_dir, require_dir};
use snapfix::disk::DiskStore;
use snapfix::fix::OneShotFixer;
use snapfix::fs::SnapshotFs;
use snapfix::pattern::DEFAULT_SHELL_KIND;
use snapfix::reconcile::Reconciler;
use snapfix::{PathResolver, SnapfixError, SnapshotIndex, SnapshotPattern};
use std::path::PathBuf;
use std::pin::Pin;
use std::process::ExitCode;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "snapfix", version)]
#[command(about = "Redirect missing shell snapshot files to the latest real snapshot")]
struct Cli {
    /// Shell kind in snapshot names (snapshot-<kind>-<id>-<hash>.sh).
    #[arg(long, global = true, default_value = DEFAULT_SHELL_KIND)]
    shell_kind: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mount SOURCE at MOUNTPOINT, serving missing snapshots from the latest one.
    Mount {
        /// Directory holding the real snapshot files.
        source: PathBuf,

        /// Mount point; created if it does not exist.
        mountpoint: PathBuf,

        /// Allow other users to access the mount (passes allow_other to FUSE).
        #[arg(long, default_value_t = false)]
        allow_other: bool,

        /// Permit mounting on a non-empty directory.
        #[arg(long, default_value_t = false)]
        nonempty: bool,

        /// fdatasync data files on write.
        #[arg(long, default_value_t = false)]
        sync_data: bool,
    },

    /// Keep repairing broken snapshot symlinks until terminated.
    Watch {
        #[arg(long, env = "SNAPFIX_SNAPSHOT_DIR")]
        snapshot_dir: Option<PathBuf>,

        /// Seconds between repair cycles.
        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
        interval_secs: u64,

        /// Run a single repair cycle and exit.
        #[arg(long, default_value_t = false)]
        once: bool,
    },

    /// Link the snapshot named in an error message to the latest snapshot.
    Fix {
        #[arg(long, env = "SNAPFIX_SNAPSHOT_DIR")]
        snapshot_dir: Option<PathBuf>,

        /// Error message text; multiple words are joined with spaces.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            let code = err
                .downcast_ref::<SnapfixError>()
                .map(SnapfixError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let pattern = SnapshotPattern::new(&cli.shell_kind)
        .with_context(|| format!("invalid shell kind {:?}", cli.shell_kind))?;

    match cli.command {
        Command::Mount {
            source,
            mountpoint,
            allow_other,
            nonempty,
            sync_data,
        } => {
            let opts = MountArgs {
                allow_other,
                nonempty,
                sync_data,
            };
            mount(pattern, source, mountpoint, opts).await
        }
        Command::Watch {
            snapshot_dir,
            interval_secs,
            once,
        } => {
            let index = SnapshotIndex::new(snapshot_dir_or_default(snapshot_dir)?, pattern);
            let reconciler = Reconciler::new(index.clone());
            if once {
                require_dir(index.dir())?;
                let report = reconciler.run_cycle()?;
                println!("Fixed {} broken symlinks", report.fixed);
                return Ok(());
            }
            let interval = Duration::from_secs(interval_secs.max(1));
            reconciler.run(interval, termination()?).await?;
            Ok(())
        }
        Command::Fix { snapshot_dir, text } => {
            let index = SnapshotIndex::new(snapshot_dir_or_default(snapshot_dir)?, pattern);
            let fixer = OneShotFixer::new(index);
            fixer.run(&text.join(" "), &mut std::io::stdout())?;
            Ok(())
        }
    }
}

fn snapshot_dir_or_default(dir: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => default_snapshot_dir().context("cannot determine home directory"),
    }
}

/// Resolves on the first SIGINT or SIGTERM.
fn termination() -> std::io::Result<impl Future<Output = ()>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => (),
        }
    })
}

struct MountArgs {
    allow_other: bool,
    nonempty: bool,
    sync_data: bool,
}

async fn mount(
    pattern: SnapshotPattern,
    source: PathBuf,
    mountpoint: PathBuf,
    args: MountArgs,
) -> anyhow::Result<()> {
    require_dir(&source)?;
    // Redirect targets are joined onto the root, so it must be absolute.
    let source = source
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", source.display()))?;
    std::fs::create_dir_all(&mountpoint)
        .with_context(|| format!("cannot create mount point {}", mountpoint.display()))?;

    let config = Config::open_backend(source.clone(), args.sync_data)
        .map_err(std::io::Error::from)
        .with_context(|| format!("cannot open {}", source.display()))?;

    let shell_kind = pattern.shell_kind().to_owned();
    let resolver = PathResolver::new(SnapshotIndex::new(source.clone(), pattern));
    let fs = SnapshotFs::new(resolver, DiskStore::new(config));

    let mut mount_opts = MountOptions::default();
    mount_opts.fs_name("snapfix");
    mount_opts.allow_other(args.allow_other);
    mount_opts.nonempty(args.nonempty);

    let session = Session::new(mount_opts);
    let handle = session.mount_with_unprivileged(fs, &mountpoint).await?;
    tracing::info!(
        source = %source.display(),
        mountpoint = %mountpoint.display(),
        shell_kind,
        "snapshot filesystem mounted"
    );

    // Unmount on SIGINT/SIGTERM so clients do not hang on a dead mount.
    let (unmount_tx, unmount_rx) = oneshot::channel::<()>();

    let mut mount_task = tokio::spawn(async move {
        let mut handle = Some(handle);
        let mut handle_future = poll_fn(|cx| {
            let handle = handle.as_mut().expect("mount handle missing");
            Pin::new(handle).poll(cx)
        });

        let res = tokio::select! {
            res = &mut handle_future => res,
            _ = unmount_rx => {
                let handle = handle.take().expect("mount handle missing");
                handle.unmount().await
            }
        };

        res.map_err(anyhow::Error::from)
    });

    let signals = termination()?;
    tokio::pin!(signals);

    let result = tokio::select! {
        res = &mut mount_task => res,
        _ = &mut signals => {
            tracing::info!("termination requested, unmounting");
            let _ = unmount_tx.send(());
            mount_task.await
        }
    };

    result??;
    tracing::info!(mountpoint = %mountpoint.display(), "snapshot filesystem unmounted");
    Ok(())
}
