use eframe::egui;

use crate::common::events::SyncStatus;
use crate::common::types::ReactionKind;
use crate::ui::state::AppState;

#[derive(Default)]
pub struct SidebarActions {
    pub reaction: Option<ReactionKind>,
    pub resync: bool,
}

pub fn render(ui: &mut egui::Ui, state: &AppState) -> SidebarActions {
    let mut actions = SidebarActions::default();

    ui.heading("Room");
    ui.label(&state.room_id);
    ui.separator();

    render_status(ui, state.status, &mut actions);
    ui.separator();

    ui.label(format!("You: {}", state.user_id));
    ui.separator();

    ui.heading("React");
    ui.horizontal_wrapped(|ui| {
        for kind in ReactionKind::ALL {
            let count = state.reaction_count(kind);
            let label = if count > 0 {
                format!("{} {count}", kind.emoji())
            } else {
                kind.emoji().to_string()
            };
            if ui.button(label).clicked() {
                actions.reaction = Some(kind);
            }
        }
    });
    ui.separator();

    ui.heading("Participants");
    let participants = state.participants();
    if participants.is_empty() {
        ui.label(egui::RichText::new("No one has spoken yet").weak());
    } else {
        for (display, is_host) in participants {
            ui.horizontal(|ui| {
                // Hiển thị trạng thái online với màu xanh
                ui.colored_label(egui::Color32::GREEN, "●");
                ui.label(&display);
                if is_host {
                    ui.label(egui::RichText::new("(host)").weak());
                }
            });
        }
    }

    actions
}

fn render_status(ui: &mut egui::Ui, status: SyncStatus, actions: &mut SidebarActions) {
    match status {
        SyncStatus::LocalOnly => {
            ui.colored_label(egui::Color32::GRAY, "● Local only (demo)");
            ui.label(egui::RichText::new("Backend not configured").weak());
        }
        SyncStatus::Connecting => {
            ui.colored_label(egui::Color32::YELLOW, "● Connecting...");
        }
        SyncStatus::Live => {
            ui.colored_label(egui::Color32::GREEN, "● Live");
        }
        SyncStatus::Retrying { attempt, delay_ms } => {
            ui.colored_label(
                egui::Color32::YELLOW,
                format!("● Reconnecting (attempt {attempt})"),
            );
            ui.label(egui::RichText::new(format!("next try in {delay_ms}ms")).weak());
        }
        SyncStatus::Degraded => {
            ui.colored_label(egui::Color32::RED, "● Disconnected");
            if ui.button("Resync").clicked() {
                actions.resync = true;
            }
        }
    }
}
