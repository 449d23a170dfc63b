//! Command handlers for the appmirror CLI.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context as _, Result};
use appmirror_core::manage;
use appmirror_core::sync::{self, knowledge, EntityKind};
use appmirror_core::{
    Account, App, AppType, Config, ConflictDecision, Error, KnowledgeBase, Platform, PullReconciler,
    PullReport, PushOutcome, PushReconciler, SessionRegistry, Store, Workspace,
};
use indicatif::{ProgressBar, ProgressStyle};

/// Environment variable consulted by `account add` without `--password-stdin`.
const PASSWORD_ENV: &str = "APPMIRROR_PASSWORD";

/// Everything a command needs: configuration, the tree and remote sessions.
pub struct Context {
    config: Config,
    store: Store,
    sessions: SessionRegistry,
}

impl Context {
    pub fn open(config: Config) -> Result<Self> {
        let root = config.store_root();
        tracing::info!(root = %root.display(), "Opening tree");
        let store = Store::open(&root, &config.key_path()).context("failed to open tree")?;
        let sessions = SessionRegistry::http(config.remote.clone());
        Ok(Self {
            config,
            store,
            sessions,
        })
    }

    /// Paths that exist relative to the working directory are taken as is;
    /// anything else is looked up relative to the tree root.
    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        if path.exists() {
            let cwd = std::env::current_dir().context("failed to read working directory")?;
            return Ok(cwd.join(path));
        }
        Ok(self.store.root().join(path))
    }

    fn display<'p>(&self, path: &'p Path) -> std::path::Display<'p> {
        path.strip_prefix(self.store.root()).unwrap_or(path).display()
    }

    fn puller(&self) -> PullReconciler<'_> {
        PullReconciler::new(&self.store, &self.sessions)
            .with_overlap(self.config.knowledge.overlap_chars)
    }
}

// ============================================
// Platforms and accounts
// ============================================

pub fn platform_add(ctx: &Context, name: &str, url: &str) -> Result<()> {
    let path = manage::add_platform(&ctx.store, name, url).context("failed to add platform")?;
    let platform: Platform = ctx.store.require(&path)?;
    println!("Added platform {} ({}) at {}", platform.name, platform.url, path.display());
    Ok(())
}

pub fn platform_list(ctx: &Context) -> Result<()> {
    let platforms = ctx.store.list::<Platform>(ctx.store.root())?;
    if platforms.is_empty() {
        println!("No platforms registered. Add one with `appmirror platform add NAME URL`.");
        return Ok(());
    }

    for platform in platforms {
        println!(
            "{}  {}  ({})",
            platform.record.name,
            platform.record.url,
            ctx.display(&platform.path)
        );
        for account in ctx.store.list::<Account>(&platform.path)? {
            let workspaces = ctx.store.list::<Workspace>(&account.path)?;
            println!(
                "  - {} ({} workspace(s))",
                account.record.email,
                workspaces.len()
            );
        }
    }
    Ok(())
}

pub async fn platform_remove(ctx: &Context, platform: &Path) -> Result<()> {
    let path = ctx.resolve(platform)?;
    manage::remove_platform(&ctx.store, &ctx.sessions, &path)
        .await
        .context("failed to remove platform")?;
    println!("Removed {}", ctx.display(&path));
    Ok(())
}

pub fn account_add(
    ctx: &Context,
    platform: &Path,
    email: &str,
    password_stdin: bool,
) -> Result<()> {
    let password = if password_stdin {
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("failed to read password from stdin")?;
        line.trim_end_matches(['\r', '\n']).to_string()
    } else {
        std::env::var(PASSWORD_ENV).map_err(|_| {
            anyhow!("no password given: pass --password-stdin or set {}", PASSWORD_ENV)
        })?
    };
    if password.is_empty() {
        bail!("password is empty");
    }

    let platform_dir = ctx.resolve(platform)?;
    let path = manage::add_account(&ctx.store, &platform_dir, email, &password)
        .context("failed to add account")?;
    println!("Added account {} at {}", email, ctx.display(&path));
    Ok(())
}

pub fn account_remove(ctx: &Context, account: &Path) -> Result<()> {
    let path = ctx.resolve(account)?;
    manage::remove_account(&ctx.store, &path).context("failed to remove account")?;
    println!("Removed {}", ctx.display(&path));
    Ok(())
}

// ============================================
// Pull
// ============================================

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

pub async fn pull(ctx: &Context, path: Option<&Path>) -> Result<()> {
    let puller = ctx.puller();
    let store = &ctx.store;

    let report = match path {
        None => {
            let pb = progress_bar()?;
            let report = puller
                .pull_all_with_progress(|done, total, label| {
                    pb.set_length(total as u64);
                    pb.set_position(done as u64);
                    pb.set_message(label.to_string());
                })
                .await
                .context("pull failed")?;
            pb.finish_and_clear();
            report
        }
        Some(path) => {
            let path = ctx.resolve(path)?;
            if store.get::<Platform>(&path)?.is_some() {
                let pb = progress_bar()?;
                let report = puller
                    .pull_platform_with_progress(&path, |done, total, label| {
                        pb.set_length(total as u64);
                        pb.set_position(done as u64);
                        pb.set_message(label.to_string());
                    })
                    .await
                    .context("pull failed")?;
                pb.finish_and_clear();
                report
            } else if store.get::<Account>(&path)?.is_some() {
                puller.pull_account(&path).await.context("pull failed")?
            } else if store.get::<Workspace>(&path)?.is_some() {
                puller.pull_workspace(&path).await.context("pull failed")?
            } else if store.get::<App>(&path)?.is_some() {
                let app_dir = puller.pull_app(&path).await.context("pull failed")?;
                println!("Pulled {}", ctx.display(&app_dir));
                return Ok(());
            } else if let Some(kb) = store.get::<KnowledgeBase>(&path)? {
                let workspace = store.knowledge_context(&path)?.workspace.path;
                let (_, report) = puller
                    .pull_knowledge(&workspace, &kb.remote_id)
                    .await
                    .context("pull failed")?;
                report
            } else {
                bail!(
                    "{} is not a platform, account, workspace, app or knowledge base",
                    path.display()
                );
            }
        }
    };

    print_report(&report);
    if report.has_errors() {
        bail!("pull finished with {} error(s)", report.errors.len());
    }
    Ok(())
}

fn print_report(report: &PullReport) {
    println!("\nPull complete:");
    if report.accounts_pulled > 0 {
        println!("  Accounts pulled:  {}", report.accounts_pulled);
    }
    println!(
        "  Workspaces:       +{} ~{} -{}",
        report.workspaces_created, report.workspaces_updated, report.workspaces_deleted
    );
    println!(
        "  Apps:             +{} ~{} -{} ({} unchanged)",
        report.apps_created, report.apps_updated, report.apps_deleted, report.apps_unchanged
    );
    println!("  Registries:       {}", report.registries_refreshed);
    if report.knowledge_bases_pulled > 0 {
        println!(
            "  Knowledge bases:  {} (documents +{} -{}, {} kept local)",
            report.knowledge_bases_pulled,
            report.documents_written,
            report.documents_removed,
            report.documents_skipped
        );
    }

    if !report.warnings.is_empty() {
        println!("\nWarnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  {}", warning);
        }
    }
    if !report.errors.is_empty() {
        println!("\nErrors ({}):", report.errors.len());
        for (scope, err) in &report.errors {
            println!("  {}: {}", scope, err);
        }
    }
}

// ============================================
// Push and status
// ============================================

pub async fn push(ctx: &Context, app_path: &Path, force: bool, pull_first: bool) -> Result<()> {
    let path = ctx.resolve(app_path)?;
    let decision = if force {
        ConflictDecision::Force
    } else if pull_first {
        ConflictDecision::PullFirst
    } else {
        ConflictDecision::Cancel
    };

    let pusher = PushReconciler::new(&ctx.store, &ctx.sessions).with_resolver(&decision);
    match pusher.push_app(&path).await {
        Ok(PushOutcome::Pushed {
            path,
            remote_id,
            created,
        }) => {
            let verb = if created { "Created" } else { "Pushed" };
            println!("{} {} ({})", verb, ctx.display(&path), remote_id);
            Ok(())
        }
        Ok(PushOutcome::PulledInstead { path }) => {
            println!("Remote changed; pulled {} instead", ctx.display(&path));
            Ok(())
        }
        Err(e @ Error::Conflict { .. }) => Err(anyhow!(e).context(
            "push cancelled; use --force to overwrite the remote \
             or --pull-first to take its version",
        )),
        Err(e) => Err(e).context("push failed"),
    }
}

pub async fn status(ctx: &Context, path: Option<&Path>, remote: bool) -> Result<()> {
    let root = match path {
        Some(path) => ctx.resolve(path)?,
        None => ctx.store.root().to_path_buf(),
    };
    let entries = sync::status_tree(&ctx.store, &root).context("failed to read status")?;
    if entries.is_empty() {
        println!("Nothing tracked under {}", root.display());
        return Ok(());
    }

    for entry in entries {
        let mut status = entry.status;
        if remote && entry.kind == EntityKind::App {
            match live_status(ctx, &entry.path).await {
                Ok(live) => status = live,
                Err(e) => {
                    tracing::warn!(
                        path = %entry.path.display(),
                        error = %e,
                        "Remote status unavailable"
                    );
                    eprintln!("  warning: {}: {}", entry.name, e);
                }
            }
        }
        let kind = match entry.kind {
            EntityKind::App => "app",
            EntityKind::KnowledgeBase => "knowledge",
        };
        println!("{:<16} {:<10} {}", status.as_str(), kind, ctx.display(&entry.path));
    }
    Ok(())
}

async fn live_status(
    ctx: &Context,
    app_path: &Path,
) -> appmirror_core::Result<appmirror_core::SyncStatus> {
    let workspace = ctx.store.app_context(app_path)?;
    let gateway = sync::connect_workspace(&ctx.store, &ctx.sessions, &workspace).await?;
    sync::remote_status(&ctx.store, gateway.as_ref(), app_path).await
}

// ============================================
// Offline authoring
// ============================================

fn read_optional(from: Option<&Path>) -> Result<Option<String>> {
    from.map(|path| {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
    })
    .transpose()
}

pub fn app_new(
    ctx: &Context,
    workspace: &Path,
    name: &str,
    app_type: AppType,
    from: Option<&Path>,
) -> Result<()> {
    let workspace = ctx.resolve(workspace)?;
    let content = read_optional(from)?.unwrap_or_else(|| {
        format!(
            "app:\n  name: {}\n  mode: {}\n",
            name,
            app_type.remote_mode()
        )
    });
    let path = manage::create_local_app(&ctx.store, &workspace, name, app_type, &content)
        .context("failed to create app")?;
    println!("Created {} app at {}", app_type, ctx.display(&path));
    if !app_type.supports_push() {
        println!("Note: {} apps cannot be pushed", app_type);
    }
    Ok(())
}

pub async fn knowledge_pull(ctx: &Context, workspace: &Path, dataset_id: &str) -> Result<()> {
    let workspace = ctx.resolve(workspace)?;
    let (kb_dir, report) = ctx
        .puller()
        .pull_knowledge(&workspace, dataset_id)
        .await
        .context("knowledge pull failed")?;
    println!("Pulled knowledge base into {}", ctx.display(&kb_dir));
    print_report(&report);
    if report.has_errors() {
        bail!("pull finished with {} error(s)", report.errors.len());
    }
    Ok(())
}

pub fn knowledge_new_doc(
    ctx: &Context,
    knowledge_base: &Path,
    name: &str,
    from: Option<&Path>,
) -> Result<()> {
    let kb_dir = ctx.resolve(knowledge_base)?;
    let text = read_optional(from)?.unwrap_or_default();
    let path = manage::create_local_document(&ctx.store, &kb_dir, name, &text)
        .context("failed to create document")?;
    println!("Created document at {}", ctx.display(&path));
    Ok(())
}

pub async fn knowledge_push(ctx: &Context, document: &Path) -> Result<()> {
    let path = ctx.resolve(document)?;
    let doc = knowledge::push_document(&ctx.store, &ctx.sessions, &path)
        .await
        .context("document push failed")?;
    println!("Pushed {} ({})", doc.name, doc.id);
    Ok(())
}

pub async fn knowledge_rm(ctx: &Context, document: &Path) -> Result<()> {
    let path = ctx.resolve(document)?;
    knowledge::delete_document(&ctx.store, &ctx.sessions, &path)
        .await
        .context("document delete failed")?;
    println!("Deleted {}", ctx.display(&path));
    Ok(())
}
