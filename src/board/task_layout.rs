//! Task board: one section per status, in board order.

use super::{Block, BoardLayout, COLOR_BLUE, Control, Field, MAX_FIELDS_PER_BLOCK, VoiceCounts};
use crate::model::{Task, TaskStatus, UserId, mention_list};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// Upper bound on fields one task contributes, separator included.
const FIELDS_PER_TASK: usize = 6;

const SECTION_FOOTER: &str = "Use /update <task_id> to change status • /help for more commands";

/// Groups tasks by status. Every status gets a section, even when empty.
#[derive(Debug, Clone)]
pub struct TaskLayout {
    tasks_per_block: usize,
    offset: FixedOffset,
}

impl TaskLayout {
    /// `offset` decides which calendar day counts as "today" for due dates.
    #[must_use]
    pub fn new(tasks_per_block: usize, offset: FixedOffset) -> Self {
        Self {
            tasks_per_block: tasks_per_block.clamp(1, MAX_FIELDS_PER_BLOCK / FIELDS_PER_TASK),
            offset,
        }
    }

    #[must_use]
    pub fn tasks_per_block(&self) -> usize {
        self.tasks_per_block
    }

    fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// Sections holding only the tasks assigned to `user`. Empty statuses are
    /// left out.
    #[must_use]
    pub fn personal(&self, tasks: &[Task], user: UserId, now: DateTime<Utc>) -> Vec<Block> {
        let today = self.today(now);
        let mine: Vec<&Task> = tasks.iter().filter(|t| t.is_assigned_to(user)).collect();
        let mut blocks = Vec::new();
        for status in TaskStatus::ALL {
            let group: Vec<&Task> = mine.iter().copied().filter(|t| t.status == status).collect();
            if group.is_empty() {
                continue;
            }
            let title = format!(
                "{} Your {} Tasks ({})",
                status.emoji(),
                status.label(),
                group.len()
            );
            blocks.extend(self.section(&title, status, &group, today));
        }
        blocks
    }

    /// Full detail view of a single task.
    #[must_use]
    pub fn detail(&self, task: &Task, now: DateTime<Utc>) -> Block {
        let today = self.today(now);
        let mut dates = format!("🕒 Created: {}\n", task.created_at.format("%Y-%m-%d %H:%M"));
        dates.push_str(&due_line(task.due_date, today));

        let mut block = Block::new(format!("Task Details: {}", task.title), task.status.color())
            .field("🔍 Task ID", format!("#{}", task.id), true)
            .field(
                "📊 Status",
                format!("{} {}", task.status.emoji(), task.status.label()),
                true,
            )
            .field("📝 Description", format!("```{}```", task.description), false)
            .field(
                "👥 Assigned To",
                mention_list(&task.assigned_users, "*No users assigned*"),
                false,
            )
            .field("📅 Dates", dates, false);
        if let Some(thread) = task.thread {
            block = block
                .field("💬 Discussion Thread", thread.thread_id.mention(), false)
                .field("Thread Created By", thread.creator_id.mention(), true);
        }
        block.footer("Use /update to change the status of this task")
    }

    fn section(
        &self,
        title: &str,
        status: TaskStatus,
        tasks: &[&Task],
        today: NaiveDate,
    ) -> Vec<Block> {
        if tasks.is_empty() {
            return vec![
                Block::new(title, status.color()).description(format!(
                    "*No tasks are currently {}*",
                    status.label().to_lowercase()
                )),
            ];
        }
        tasks
            .chunks(self.tasks_per_block)
            .map(|chunk| {
                let mut block = Block::new(title, status.color()).footer(SECTION_FOOTER);
                for (index, task) in chunk.iter().enumerate() {
                    if index > 0 {
                        block.push_field(Field::spacer());
                    }
                    for field in task_fields(task, today) {
                        block.push_field(field);
                    }
                }
                block
            })
            .collect()
    }
}

impl BoardLayout for TaskLayout {
    type Entity = Task;

    fn channel_name(&self) -> &'static str {
        "task-board"
    }

    fn header(&self) -> Block {
        Block::new("🎯 Task Management Dashboard", COLOR_BLUE)
            .description(
                "**Welcome to the Task Board!**\n\n\
                 📋 Track and manage your team's tasks in real-time\n\
                 📊 Tasks are organized by their current status\n\n\
                 *Use `/help` for a list of available commands*",
            )
            .controls(vec![Control::create_task()])
    }

    fn render(&self, tasks: &[Task], now: DateTime<Utc>, _voice: &VoiceCounts) -> Vec<Block> {
        let today = self.today(now);
        let mut blocks = Vec::new();
        for status in TaskStatus::ALL {
            let group: Vec<&Task> = tasks.iter().filter(|t| t.status == status).collect();
            let title = format!("{} {} ({})", status.emoji(), status.label(), group.len());
            blocks.extend(self.section(&title, status, &group, today));
        }
        blocks
    }
}

fn task_fields(task: &Task, today: NaiveDate) -> Vec<Field> {
    let mut fields = vec![
        Field::new(
            format!("#{} • {}", task.id, task.title),
            format!("**Task description**:\n```{}```", task.description),
            false,
        ),
        Field::new(
            "Assigned To",
            mention_list(&task.assigned_users, "Unassigned"),
            true,
        ),
        Field::new("Due Date", due_line(task.due_date, today), true),
        Field::new(
            "Status",
            format!("{} {}", task.status.emoji(), task.status.label()),
            true,
        ),
    ];
    if let Some(thread) = task.thread {
        fields.push(Field::new("💬 Discussion", thread.thread_id.mention(), true));
    }
    fields
}

/// Due-date line: overdue, due today, due within two days, or the date.
#[must_use]
pub fn due_line(due: Option<NaiveDate>, today: NaiveDate) -> String {
    let Some(due) = due else {
        return "📅 No due date".to_owned();
    };
    let days = (due - today).num_days();
    match days {
        d if d < 0 => format!("⚠️ **OVERDUE** ({} {})", -d, plural_days(-d)),
        0 => "⚠️ **DUE TODAY**".to_owned(),
        1..=2 => format!("⚠️ Due in {days} {}", plural_days(days)),
        _ => format!("📅 Due {}", due.format("%Y-%m-%d")),
    }
}

fn plural_days(n: i64) -> &'static str {
    if n == 1 { "day" } else { "days" }
}
