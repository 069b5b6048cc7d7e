use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use spellprep::content::builtin_world;
use spellprep::memory::{MemoryWorld, WorldBuilder, WorldSnapshot};
use spellprep::preparation::{PreparationStatus, PreparationView, SaveSummary};
use spellprep::{ActorId, ClassId, RuleSet, SpellUuid, UserId};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, ValueEnum)]
enum RuleSetArg {
    Legacy,
    Modern,
}

impl From<RuleSetArg> for RuleSet {
    fn from(value: RuleSetArg) -> Self {
        match value {
            RuleSetArg::Legacy => RuleSet::Legacy,
            RuleSetArg::Modern => RuleSet::Modern,
        }
    }
}

#[derive(Subcommand)]
enum Cmd {
    /// List an actor's spellcasting classes with their limits
    Classes { actor: String },
    /// Show every spell a class can see and its preparation status
    View {
        actor: String,
        class: String,
        /// Print the view as JSON
        #[arg(long)]
        json: bool,
    },
    /// Prepare and unprepare spells for one class
    Prepare {
        actor: String,
        class: String,
        /// Spell UUID to prepare (repeatable)
        #[arg(long = "add")]
        add: Vec<String>,
        /// Spell UUID to unprepare (repeatable)
        #[arg(long = "remove")]
        remove: Vec<String>,
    },
    /// Record a long rest, opening long-rest swap windows
    LongRest { actor: String },
    /// Apply a rule set to every class of an actor
    Ruleset {
        actor: String,
        #[arg(value_enum)]
        rule_set: RuleSetArg,
    },
    /// Summarize prepared spells across party members
    Party {
        actors: Vec<String>,
        /// Print the party view as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the world snapshot as JSON (stdout)
    Dump {
        /// Single-line JSON
        #[arg(long)]
        compact: bool,
    },
}

#[derive(Parser)]
#[command(name = "spellprep")]
#[command(about = "Spell preparation harness over a JSON world")]
struct Cli {
    /// World snapshot to load instead of a built-in one
    #[arg(long, global = true)]
    world: Option<PathBuf>,
    /// Built-in world used when --world is absent
    #[arg(long, global = true, default_value = "demo")]
    builtin: String,
    /// Write the resulting world here
    #[arg(long, global = true)]
    out: Option<PathBuf>,
    /// Act as this user instead of the world's current user
    #[arg(long, global = true)]
    user: Option<String>,
    #[command(subcommand)]
    cmd: Cmd,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_world(cli: &Cli) -> Result<WorldSnapshot> {
    let mut snapshot = match &cli.world {
        Some(path) => WorldSnapshot::load(path)?,
        None => builtin_world(&cli.builtin)?,
    };
    if let Some(user) = &cli.user {
        snapshot.current_user = Some(UserId::new(user.as_str()));
    }
    Ok(snapshot)
}

/// Serialized name of a unit-like enum value, e.g. `longRest`.
fn label<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(serde_json::Value::Object(map)) => map
            .get("code")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

fn status_label(status: &PreparationStatus) -> String {
    match status {
        PreparationStatus::None => "-".to_string(),
        PreparationStatus::Prepared => "prepared".to_string(),
        PreparationStatus::PreparedByOther { by_class } => format!("by {by_class}"),
        PreparationStatus::Always { .. } => "always".to_string(),
        PreparationStatus::Granted { .. } => "granted".to_string(),
        PreparationStatus::Special { mode } => mode.to_string(),
        PreparationStatus::CantripLocked { .. } => "locked".to_string(),
    }
}

fn print_view(view: &PreparationView) {
    let limits = &view.limits;
    println!(
        "{} ({}, {}) spells {}/{} cantrips {}/{} max level {}{}",
        view.class,
        label(&view.context),
        label(&view.enforcement),
        limits.spells.current,
        limits.spells.max,
        limits.cantrips.current,
        limits.cantrips.max,
        limits.max_spell_level,
        if view.read_only { " [read-only]" } else { "" }
    );
    for spell in &view.spells {
        println!(
            "  L{} {:<10} {}{}{}",
            spell.level,
            status_label(&spell.status),
            spell.name,
            if spell.is_ritual { " (ritual)" } else { "" },
            if spell.in_spellbook { " [book]" } else { "" }
        );
    }
}

fn print_summary(summary: &SaveSummary) {
    for change in summary.cantrip_changes.added.iter().chain(&summary.spell_changes.added) {
        println!("+ {}", change.name);
    }
    for change in summary.cantrip_changes.removed.iter().chain(&summary.spell_changes.removed) {
        println!("- {}", change.name);
    }
    for rejected in &summary.rejected {
        println!("! {} {}", rejected.key.spell, label(&rejected.reason));
    }
    for warning in &summary.warnings {
        println!("~ {} {}", warning.key.spell, label(&warning.warning));
    }
    let limits = &summary.over_limits;
    if limits.spells.is_over || limits.cantrips.is_over {
        println!(
            "over limit: spells {}/{} cantrips {}/{}",
            limits.spells.current, limits.spells.max, limits.cantrips.current, limits.cantrips.max
        );
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(world: &MemoryWorld, cmd: Cmd) -> Result<()> {
    let core = &world.core;
    match cmd {
        Cmd::Classes { actor } => {
            let id = ActorId::new(actor);
            let found = core.actor(&id).await?;
            for entry in found.spellcasting_classes() {
                let view = core.preparation().view(&id, entry.id()).await?;
                println!(
                    "{} L{} spells {}/{} cantrips {}/{} max level {}",
                    entry.id(),
                    entry.data.levels,
                    view.limits.spells.current,
                    view.limits.spells.max,
                    view.limits.cantrips.current,
                    view.limits.cantrips.max,
                    view.limits.max_spell_level
                );
            }
        }
        Cmd::View { actor, class, json } => {
            let view = core
                .preparation()
                .view(&ActorId::new(actor), &ClassId::new(class))
                .await?;
            if json {
                print_json(&view)?;
            } else {
                print_view(&view);
            }
        }
        Cmd::Prepare {
            actor,
            class,
            add,
            remove,
        } => {
            let add: Vec<SpellUuid> = add.into_iter().map(SpellUuid::new).collect();
            let remove: Vec<SpellUuid> = remove.into_iter().map(SpellUuid::new).collect();
            let summary = core
                .preparation()
                .prepare(&ActorId::new(actor), &ClassId::new(class), &add, &remove)
                .await?;
            print_summary(&summary);
        }
        Cmd::LongRest { actor } => {
            core.cantrips().on_long_rest(&ActorId::new(actor.as_str())).await?;
            println!("{actor}: long rest recorded");
        }
        Cmd::Ruleset { actor, rule_set } => {
            let rule_set = RuleSet::from(rule_set);
            core.rules()
                .apply_rule_set_to_actor(&ActorId::new(actor.as_str()), rule_set)
                .await?;
            println!("{actor}: {rule_set}");
        }
        Cmd::Party { actors, json } => {
            let ids: Vec<ActorId> = actors.into_iter().map(ActorId::new).collect();
            let view = core.party().aggregate(&ids, None).await?;
            if json {
                return print_json(&view);
            }
            for member in &view.actors {
                let focus = member.selected_focus.as_deref().unwrap_or("none");
                if member.has_permission {
                    println!(
                        "{} focus {} prepared {} known {}",
                        member.name, focus, member.total_prepared, member.total_known
                    );
                } else {
                    println!("{} focus {} (hidden)", member.name, focus);
                }
            }
            for overlap in &view.synergy.overlap {
                println!("overlap: {} ({} casters)", overlap.name, overlap.actors.len());
            }
            for role in &view.synergy.missing_roles {
                println!("missing role: {}", label(role));
            }
        }
        Cmd::Dump { compact } => {
            let snapshot = world.store.snapshot().await;
            if compact {
                println!("{}", serde_json::to_string(&snapshot)?);
            } else {
                print_json(&snapshot)?;
            }
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let snapshot = load_world(&cli)?;
    let world = WorldBuilder::from_snapshot(snapshot).build();
    let out = cli.out.clone();

    run(&world, cli.cmd).await?;

    if let Some(path) = out {
        world
            .store
            .snapshot()
            .await
            .save(&path)
            .with_context(|| format!("writing world to {}", path.display()))?;
        info!(path = %path.display(), "world written");
    }
    Ok(())
}
