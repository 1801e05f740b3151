use eframe::egui;

use crate::common::types::{ReactionKind, SYSTEM_USER};
use crate::ui::state::{AppState, DisplayMessage};

#[derive(Default)]
pub struct ChatAreaActions {
    pub message_reaction: Option<(String, ReactionKind)>,
}

pub fn render(ui: &mut egui::Ui, state: &AppState) -> ChatAreaActions {
    let mut actions = ChatAreaActions::default();
    let input_height = 60.0;

    egui::ScrollArea::vertical()
        .stick_to_bottom(true)
        .max_height((ui.available_height() - input_height).max(0.0))
        .show(ui, |ui| {
            if state.messages.is_empty() {
                ui.label(egui::RichText::new("No messages yet").weak());
                return;
            }
            for message in &state.messages {
                render_message(ui, state, message, &mut actions);
            }
        });

    actions
}

fn render_message(
    ui: &mut egui::Ui,
    state: &AppState,
    display: &DisplayMessage,
    actions: &mut ChatAreaActions,
) {
    let message = &display.message;
    let name = if message.is_host {
        message
            .host_name
            .clone()
            .unwrap_or_else(|| message.user_id.clone())
    } else {
        message.user_id.clone()
    };
    let name_color = if display.is_sender {
        egui::Color32::LIGHT_BLUE
    } else if message.is_host {
        egui::Color32::GOLD
    } else {
        egui::Color32::GRAY
    };

    ui.horizontal(|ui| {
        ui.colored_label(name_color, name);
        ui.label(egui::RichText::new(format_time(&message.timestamp)).weak());
        if message.mentions.iter().any(|id| id == &state.user_id) {
            ui.colored_label(egui::Color32::LIGHT_GREEN, "@you");
        }
    });
    ui.label(&message.text);

    if message.user_id != SYSTEM_USER {
        ui.horizontal(|ui| {
            for kind in ReactionKind::ALL {
                let count = state
                    .reactions_for(&message.id)
                    .iter()
                    .filter(|r| r.kind == kind)
                    .count();
                let label = if count > 0 {
                    format!("{} {count}", kind.emoji())
                } else {
                    kind.emoji().to_string()
                };
                if ui.small_button(label).clicked() {
                    actions.message_reaction = Some((message.id.clone(), kind));
                }
            }
        });
    }
    ui.add_space(6.0);
}

fn format_time(timestamp: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(timestamp) {
        Ok(parsed) => parsed.with_timezone(&chrono::Local).format("%H:%M").to_string(),
        Err(_) => timestamp.chars().take(16).collect(),
    }
}
