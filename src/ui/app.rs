use eframe::egui;
use tokio::sync::mpsc;

use crate::common::{EngineCommand, EngineEvent};

use super::components::{chat_area, input_bar, sidebar};
use super::state::AppState;

pub struct ChatApp {
    state: AppState,
    command_sender: mpsc::Sender<EngineCommand>,
    event_receiver: mpsc::Receiver<EngineEvent>,
    was_focused: bool,
}

impl ChatApp {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        state: AppState,
        command_sender: mpsc::Sender<EngineCommand>,
        event_receiver: mpsc::Receiver<EngineEvent>,
    ) -> Self {
        Self {
            state,
            command_sender,
            event_receiver,
            was_focused: true,
        }
    }

    fn handle_engine_events(&mut self) {
        while let Ok(event) = self.event_receiver.try_recv() {
            match event {
                EngineEvent::SnapshotLoaded {
                    messages,
                    reactions,
                    message_reactions,
                } => self.state.apply_snapshot(messages, reactions, message_reactions),
                EngineEvent::MessageReceived(message) => self.state.push_message(message),
                EngineEvent::ReactionReceived(reaction) => self.state.push_reaction(reaction),
                EngineEvent::MessageReactionReceived(reaction) => {
                    self.state.push_message_reaction(reaction);
                }
                EngineEvent::WriteRejected { collection, id } => {
                    self.state.remove(collection, &id);
                }
                EngineEvent::SyncStatusChanged(status) => self.state.status = status,
            }
        }
    }

    fn send_command(&mut self, command: EngineCommand) {
        if let Err(err) = self.command_sender.try_send(command) {
            log::warn!("Failed to send command to engine: {err}");
        }
    }

    /// Desktop analog of the browser visibility/online listeners: the OS
    /// may have suspended us while unfocused, so ask the engine for a
    /// fresh session when focus comes back.
    fn check_focus_regained(&mut self, ctx: &egui::Context) {
        let (lost, regained) = ctx.input(|input| {
            let mut lost = false;
            let mut regained = false;
            for event in &input.events {
                match event {
                    egui::Event::WindowFocused(false) => lost = true,
                    egui::Event::WindowFocused(true) => regained = true,
                    _ => {}
                }
            }
            (lost, regained)
        });
        if lost {
            self.was_focused = false;
        }
        if regained && !self.was_focused {
            self.was_focused = true;
            log::info!("Window regained focus, refreshing data...");
            self.send_command(EngineCommand::Resync);
        }
    }
}

impl eframe::App for ChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_engine_events();
        self.check_focus_regained(ctx);

        egui::SidePanel::left("room_sidebar")
            .resizable(true)
            .default_width(200.0)
            .show(ctx, |ui| {
                let actions = sidebar::render(ui, &self.state);
                if let Some(kind) = actions.reaction {
                    self.send_command(EngineCommand::AddReaction { kind });
                }
                if actions.resync {
                    self.send_command(EngineCommand::Resync);
                }
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading(format!("Room: {}", self.state.room_id));
            ui.separator();
            let actions = chat_area::render(ui, &self.state);
            if let Some((message_id, kind)) = actions.message_reaction {
                self.send_command(EngineCommand::AddMessageReaction { message_id, kind });
            }

            ui.separator();
            if let Some(text) = input_bar::render(ui, &mut self.state.input_text) {
                self.send_command(EngineCommand::SendMessage { text });
            }
        });

        ctx.request_repaint();
    }
}
