//! Slash-command registrations sent to Discord on ready.

use serde_json::{Value, json};

const STRING: u8 = 3;
const INTEGER: u8 = 4;
const CHANNEL: u8 = 7;
/// Discord's voice channel type, used to filter the channel picker.
const GUILD_VOICE: u8 = 2;
/// `ADMINISTRATOR` permission bit, as a string per the API.
const ADMIN_ONLY: &str = "8";

fn option(name: &str, kind: u8, description: &str, required: bool) -> Value {
    json!({
        "name": name,
        "type": kind,
        "description": description,
        "required": required,
    })
}

fn command(name: &str, description: &str, options: Vec<Value>) -> Value {
    json!({
        "name": name,
        "type": 1,
        "description": description,
        "options": options,
    })
}

fn task_id(description: &str) -> Value {
    let mut opt = option("task_id", INTEGER, description, true);
    opt["min_value"] = json!(1);
    opt
}

/// Every slash command the bot answers, as the bulk-overwrite payload.
#[must_use]
pub fn command_definitions() -> Value {
    let mut setup = command(
        "setup",
        "Set up the task and meeting management channels (Admin only)",
        vec![],
    );
    setup["default_member_permissions"] = json!(ADMIN_ONLY);
    let mut reset = command(
        "reset_data",
        "Reset all tasks and meetings data and channels (Admin only)",
        vec![],
    );
    reset["default_member_permissions"] = json!(ADMIN_ONLY);

    let mut voice_channel = option(
        "voice_channel",
        CHANNEL,
        "Voice channel for the meeting (optional)",
        false,
    );
    voice_channel["channel_types"] = json!([GUILD_VOICE]);
    let mut duration = option("duration", INTEGER, "Duration in minutes", true);
    duration["min_value"] = json!(1);
    duration["max_value"] = json!(crate::manager::MAX_MEETING_MINUTES);

    json!([
        setup,
        reset,
        command(
            "create",
            "Create a new task",
            vec![
                option("title", STRING, "The title of the task", true),
                option("description", STRING, "Detailed description of the task", true),
                option("due_date", STRING, "Due date in DD-MM-YYYY format (optional)", false),
            ],
        ),
        command(
            "assign",
            "Assign users to a task",
            vec![
                task_id("The ID of the task to assign"),
                option("users", STRING, "The users to assign (mention them)", true),
            ],
        ),
        command("update", "Update task status", vec![task_id("The ID of the task to update")]),
        command("delete", "Delete a task", vec![task_id("The ID of the task to delete")]),
        command(
            "thread",
            "Create a discussion thread for a task",
            vec![task_id("The ID of the task to create a thread for")],
        ),
        command(
            "delete_thread",
            "Delete the discussion thread for a task",
            vec![task_id("The ID of the task whose thread to delete")],
        ),
        command(
            "info",
            "Get detailed information about a specific task",
            vec![task_id("The ID of the task to get info about")],
        ),
        command("list", "List all tasks assigned to you", vec![]),
        command("help", "Show help message with available commands", vec![]),
        command(
            "create_meeting",
            "Schedule a new meeting",
            vec![
                option("title", STRING, "Meeting title", true),
                option("start_time", STRING, "Start time (format: DD-MM-YYYY HH:MM)", true),
                duration,
                option("description", STRING, "Meeting description", false),
                option("participants", STRING, "Meeting participants (mention them)", false),
                voice_channel,
            ],
        ),
        command(
            "delete_meeting",
            "Cancel a scheduled meeting",
            vec![{
                let mut opt =
                    option("meeting_id", INTEGER, "The ID of the meeting to cancel", true);
                opt["min_value"] = json!(1);
                opt
            }],
        ),
    ])
}
