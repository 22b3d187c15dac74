use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use chrono_tz::Tz;

use dojo_core::time::{parse_kata_length, parse_kata_time};
use dojo_core::{KataView, Priority, TaskDraft, TaskId, TaskPatch, TaskStatus};

use crate::app::App;
use crate::render;

/// Kata fields as typed on the command line.
#[derive(Debug, Clone)]
pub struct AddArgs {
    pub title: String,
    pub priority: Priority,
    pub start: String,
    pub end: Option<String>,
    pub length: Option<String>,
}

impl AddArgs {
    /// Resolve local times into a validated draft before anything is sent.
    pub fn to_draft(&self, tz: Tz) -> Result<TaskDraft> {
        let start = parse_kata_time(&self.start, tz).context("--start")?;
        let end = match (&self.end, &self.length) {
            (Some(end), None) => parse_kata_time(end, tz).context("--end")?,
            (None, Some(length)) => {
                let length = parse_kata_length(length).context("--for")?;
                start
                    .checked_add_signed(length)
                    .ok_or_else(|| anyhow!("--for: length too large"))?
            }
            (Some(_), Some(_)) => bail!("pass either --end or --for, not both"),
            (None, None) => bail!("pass --end <time> or --for <length>"),
        };
        let draft = TaskDraft::new(self.title.trim(), self.priority, start, end);
        draft.validate()?;
        Ok(draft)
    }
}

pub fn list(app: &App, view: KataView) -> Result<()> {
    app.require_user()?;
    let state = app.dojo.tasks().snapshot();
    if let Some(err) = &state.error {
        bail!("could not load katas: {err}");
    }

    println!("{}\n", view.heading());
    let shown = view.select(&state.tasks, Utc::now(), app.tz);
    if shown.is_empty() {
        println!("{}", view.empty_message());
        return Ok(());
    }
    for task in shown {
        let is_active = state.active_task_id.as_ref() == Some(&task.id);
        println!("{}", render::kata_line(task, is_active, app.tz));
    }
    Ok(())
}

pub async fn add(app: &App, args: &AddArgs) -> Result<()> {
    app.require_user()?;
    let draft = args.to_draft(app.tz)?;
    let task = app.dojo.tasks().add(draft).await?;
    println!(
        "Added {} ({} min, {} XP on completion)  [{}]",
        task.title,
        task.allocated_minutes,
        task.potential_xp(),
        task.id
    );
    Ok(())
}

pub fn start(app: &App, id: &str) -> Result<()> {
    app.require_user()?;
    let id = TaskId::new(id);
    app.dojo.tasks().set_active(Some(&id))?;
    if let Some(task) = app.dojo.tasks().get(&id) {
        println!("Focus on: {}. Run `dojo focus` to start the timer.", task.title);
    }
    Ok(())
}

pub fn stop(app: &App) -> Result<()> {
    app.dojo.tasks().set_active(None)?;
    println!("Focus cleared.");
    Ok(())
}

pub async fn gong(app: &App, id: Option<String>) -> Result<()> {
    app.require_user()?;
    let id = match id.map(TaskId::new).or_else(|| app.dojo.tasks().active_task_id()) {
        Some(id) => id,
        None => bail!("No active kata. Pass an id or run: dojo kata start <id>"),
    };
    let Some(task) = app.dojo.tasks().get(&id) else {
        bail!("No kata with id {id}");
    };

    match app.dojo.tasks().complete(&id).await? {
        Some(completion) => {
            for line in render::completion_lines(&completion) {
                println!("{line}");
            }
        }
        None => println!("{} is already completed.", task.title),
    }
    Ok(())
}

pub async fn fail(app: &App, id: &str) -> Result<()> {
    set_status(app, id, TaskStatus::Failed).await?;
    println!("Marked failed.");
    Ok(())
}

pub async fn edit(
    app: &App,
    id: &str,
    title: Option<String>,
    priority: Option<Priority>,
) -> Result<()> {
    app.require_user()?;
    let id = known(app, id)?;
    let mut patch = TaskPatch::default();
    if let Some(title) = title {
        patch = patch.with_title(title.trim());
    }
    if let Some(priority) = priority {
        patch = patch.with_priority(priority);
    }
    if patch.is_empty() {
        bail!("nothing to change; pass --title and/or --priority");
    }
    app.dojo.tasks().update(&id, patch).await?;
    println!("Updated.");
    Ok(())
}

pub async fn delete(app: &App, id: &str) -> Result<()> {
    app.require_user()?;
    let id = known(app, id)?;
    app.dojo.tasks().delete(&id).await?;
    println!("Deleted.");
    Ok(())
}

pub fn profile(app: &App) -> Result<()> {
    app.require_user()?;
    match app.dojo.profiles().profile() {
        Some(profile) => {
            for line in render::profile_card(&profile) {
                println!("{line}");
            }
            Ok(())
        }
        None => match app.dojo.profiles().error() {
            Some(err) => bail!("could not load profile: {err}"),
            None => bail!("profile not found"),
        },
    }
}

async fn set_status(app: &App, id: &str, status: TaskStatus) -> Result<()> {
    app.require_user()?;
    let id = known(app, id)?;
    app.dojo.tasks().update(&id, TaskPatch::status(status)).await?;
    Ok(())
}

fn known(app: &App, id: &str) -> Result<TaskId> {
    let id = TaskId::new(id);
    if app.dojo.tasks().get(&id).is_none() {
        bail!("No kata with id {id}");
    }
    Ok(id)
}
