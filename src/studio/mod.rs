use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use eframe::egui;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::StudioSettings;
use crate::credentials::EnvCredentialSelector;
use crate::export::export_artifact;
use crate::generation::{GenerationPhase, RecoveryOption};
use crate::lineage::ArtifactId;
use crate::model::advisor::{
    ADVISOR_GREETING, AdvisorClient, AdvisorContext, AdvisorEvent, AdvisorMessage, AdvisorRole,
};
use crate::runtime::{StudioController, StudioRuntime};
use crate::session::StudioSession;
use crate::thumbnail::presets::{SUGGESTED_ACTIONS, SUGGESTED_BACKGROUNDS, SUGGESTED_EXPRESSIONS};
use crate::thumbnail::{AspectRatio, ImageData, ImageSize, QualityTier, TextStyle};

pub mod canvas;
pub mod events;

use self::canvas::{PreviewCanvas, PreviewKey};
use self::events::{StudioCommand, StudioEvent};

const APP_TITLE: &str = "Thumbnail Studio";
const ERROR_COLOR: egui::Color32 = egui::Color32::from_rgb(173, 33, 33);
const ADVISOR_COLOR: egui::Color32 = egui::Color32::from_rgb(26, 103, 64);
const ADVISOR_QUICK_PROMPTS: [&str; 2] = ["How can you help me?", "Suggest 3 better headlines"];

pub fn run_studio(settings: &StudioSettings) -> Result<()> {
    let runtime_handle = Handle::try_current().context("studio requires a tokio runtime")?;
    let runtime = StudioRuntime::from_settings(settings)?;
    let export_dir =
        std::env::current_dir().context("failed to resolve export directory for studio")?;

    let (command_tx, command_rx) = unbounded_channel::<StudioCommand>();
    let (event_tx, event_rx) = unbounded_channel::<StudioEvent>();

    spawn_runtime_worker(
        &runtime_handle,
        runtime.controller.clone(),
        runtime.credentials.clone(),
        runtime.advisor.clone(),
        command_rx,
        event_tx,
    );
    info!(
        provider = %settings.image_provider,
        export_dir = %export_dir.display(),
        "starting native studio shell"
    );

    eframe::run_native(
        APP_TITLE,
        eframe::NativeOptions::default(),
        Box::new(move |_cc| {
            Ok(Box::new(StudioApp::new(
                runtime, command_tx, event_rx, export_dir,
            )))
        }),
    )
    .map_err(|error| anyhow::anyhow!("studio UI exited with error: {error}"))
}

fn spawn_runtime_worker(
    handle: &Handle,
    controller: Arc<StudioController>,
    credentials: Arc<EnvCredentialSelector>,
    advisor: AdvisorClient,
    mut command_rx: UnboundedReceiver<StudioCommand>,
    event_tx: UnboundedSender<StudioEvent>,
) {
    let worker_handle = handle.clone();
    let _task = handle.spawn(async move {
        while let Some(command) = command_rx.recv().await {
            match command {
                StudioCommand::Generate => {
                    // Runs beside the loop so the advisor stays responsive meanwhile.
                    let controller = controller.clone();
                    let event_tx = event_tx.clone();
                    worker_handle.spawn(async move {
                        let outcome = controller.submit().await;
                        let _ = event_tx.send(StudioEvent::GenerationSettled { outcome });
                    });
                }
                StudioCommand::DeleteArtifact { artifact_id } => {
                    let error = controller
                        .delete_artifact(artifact_id)
                        .await
                        .err()
                        .map(|error| error.to_string());
                    if event_tx
                        .send(StudioEvent::ArtifactDeleted { artifact_id, error })
                        .is_err()
                    {
                        break;
                    }
                }
                StudioCommand::SelectCredential => {
                    let error = controller
                        .select_credential(credentials.as_ref())
                        .await
                        .err()
                        .map(|error| error.to_string());
                    if event_tx
                        .send(StudioEvent::CredentialSelected { error })
                        .is_err()
                    {
                        break;
                    }
                }
                StudioCommand::AskAdvisor {
                    history,
                    context,
                    cancel,
                } => {
                    let mut replies =
                        advisor.spawn_reply(&worker_handle, history, context, cancel);
                    let event_tx = event_tx.clone();
                    worker_handle.spawn(async move {
                        while let Some(event) = replies.recv().await {
                            let event = match event {
                                AdvisorEvent::Delta(text) => StudioEvent::AdvisorDelta { text },
                                AdvisorEvent::Finished { .. } => StudioEvent::AdvisorFinished,
                                AdvisorEvent::Failed { error } => {
                                    StudioEvent::AdvisorFailed { error }
                                }
                            };
                            if event_tx.send(event).is_err() {
                                break;
                            }
                        }
                    });
                }
                StudioCommand::Shutdown => break,
            }
        }
    });
}

struct StudioApp {
    runtime: StudioRuntime,
    command_tx: UnboundedSender<StudioCommand>,
    event_rx: UnboundedReceiver<StudioEvent>,
    export_dir: PathBuf,
    canvas: PreviewCanvas,
    upload_path: String,
    upload_counter: u64,
    status: String,
    advisor_open: bool,
    advisor_input: String,
    advisor_history: Vec<AdvisorMessage>,
    advisor_cancel: Option<CancellationToken>,
    runtime_disconnected: bool,
}

impl StudioApp {
    fn new(
        runtime: StudioRuntime,
        command_tx: UnboundedSender<StudioCommand>,
        event_rx: UnboundedReceiver<StudioEvent>,
        export_dir: PathBuf,
    ) -> Self {
        Self {
            runtime,
            command_tx,
            event_rx,
            export_dir,
            canvas: PreviewCanvas::default(),
            upload_path: String::new(),
            upload_counter: 0,
            status: "Ready. Upload a photo to begin.".to_owned(),
            advisor_open: false,
            advisor_input: String::new(),
            advisor_history: vec![AdvisorMessage::advisor(ADVISOR_GREETING)],
            advisor_cancel: None,
            runtime_disconnected: false,
        }
    }

    fn drain_events(&mut self) {
        loop {
            match self.event_rx.try_recv() {
                Ok(event) => self.apply_event(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.runtime_disconnected {
                        warn!("studio runtime worker disconnected");
                        self.status =
                            "Runtime worker disconnected. Restart studio to continue.".to_owned();
                    }
                    self.runtime_disconnected = true;
                    break;
                }
            }
        }
    }

    fn apply_event(&mut self, event: StudioEvent) {
        if let Some(status) = event.status_line() {
            self.status = status;
        }

        match event {
            StudioEvent::AdvisorDelta { text } => self.append_advisor_text(&text),
            StudioEvent::AdvisorFinished => self.advisor_cancel = None,
            StudioEvent::AdvisorFailed { error } => {
                self.advisor_cancel = None;
                self.append_advisor_text(&format!("Error. Try again. ({error})"));
            }
            StudioEvent::GenerationSettled { .. }
            | StudioEvent::ArtifactDeleted { .. }
            | StudioEvent::CredentialSelected { .. } => {}
        }
    }

    /// Streams into the reply placeholder pushed by `ask_advisor`.
    fn append_advisor_text(&mut self, text: &str) {
        if let Some(last) = self
            .advisor_history
            .last_mut()
            .filter(|last| last.role == AdvisorRole::Advisor)
        {
            last.text.push_str(text);
        } else {
            self.advisor_history.push(AdvisorMessage::advisor(text));
        }
    }

    fn send(&mut self, command: StudioCommand) {
        if let Err(error) = self.command_tx.send(command) {
            self.runtime_disconnected = true;
            self.status = format!("Failed to reach runtime worker: {error}");
        }
    }

    fn load_upload(&mut self, session: &mut StudioSession, path: &Path) {
        match std::fs::read(path) {
            Ok(bytes) if !bytes.is_empty() => {
                self.accept_upload(session, ImageData::from_bytes(bytes));
                self.status = format!("Loaded {}", path.display());
            }
            Ok(_) => self.status = format!("{} is empty", path.display()),
            Err(error) => self.status = format!("Failed to read {}: {error}", path.display()),
        }
    }

    fn accept_upload(&mut self, session: &mut StudioSession, image: ImageData) {
        self.upload_counter += 1;
        info!(mime_type = image.mime_type(), byte_len = image.len(), "accepted upload");
        session.set_fresh_upload(image);
    }

    fn handle_dropped_files(&mut self, ctx: &egui::Context, session: &mut StudioSession) {
        let dropped = ctx.input(|input| input.raw.dropped_files.clone());
        let Some(file) = dropped.into_iter().next() else {
            return;
        };

        if let Some(bytes) = file.bytes.filter(|bytes| !bytes.is_empty()) {
            self.accept_upload(session, ImageData::from_bytes(bytes.to_vec()));
            self.status = format!("Loaded {}", file.name);
        } else if let Some(path) = file.path {
            self.load_upload(session, &path);
        }
    }

    fn preview_key(&self, session: &StudioSession) -> Option<PreviewKey> {
        match session.lineage().active_target() {
            Some(artifact_id) => Some(PreviewKey::Artifact(artifact_id)),
            None => session
                .lineage()
                .fresh_upload()
                .map(|_| PreviewKey::Upload(self.upload_counter)),
        }
    }

    fn render_config_pane(&mut self, ui: &mut egui::Ui, session: &mut StudioSession) {
        ui.heading("Photo");
        ui.horizontal(|ui| {
            ui.add(
                egui::TextEdit::singleline(&mut self.upload_path)
                    .hint_text("path/to/photo.jpg")
                    .desired_width(220.0),
            );
            if ui.button("Load").clicked() {
                let path = PathBuf::from(self.upload_path.trim());
                self.load_upload(session, &path);
            }
        });
        ui.label("Or drop an image onto the window.");
        ui.separator();

        if session.config().is_editing() {
            self.render_edit_controls(ui, session);
        } else {
            render_create_controls(ui, session);
        }
        ui.separator();
        render_engine_controls(ui, session);
        ui.separator();

        let in_flight = session.phase().is_in_flight();
        let label = if session.config().is_editing() {
            "Apply edit"
        } else {
            "Generate thumbnail"
        };
        if ui
            .add_enabled(
                !in_flight && !self.runtime_disconnected,
                egui::Button::new(label),
            )
            .clicked()
        {
            self.send(StudioCommand::Generate);
        }

        match session.phase() {
            GenerationPhase::Submitting => {
                ui.horizontal(|ui| {
                    ui.spinner();
                    ui.label(session.progress_message().unwrap_or("Working..."));
                });
            }
            GenerationPhase::Failed { error } => {
                let error = error.clone();
                ui.colored_label(ERROR_COLOR, error.to_string());
                for option in error.recovery_options() {
                    match option {
                        RecoveryOption::SwitchToFastEngine => {
                            if ui.button("Switch to fast engine").clicked() {
                                session.switch_to_fast_engine();
                            }
                        }
                        RecoveryOption::SelectCredential => {
                            if ui.button("Select API key").clicked() {
                                self.send(StudioCommand::SelectCredential);
                            }
                        }
                    }
                }
                if ui.button("Dismiss").clicked() {
                    session.acknowledge();
                }
            }
            GenerationPhase::Idle | GenerationPhase::Succeeded { .. } => {}
        }
        if !session.credential_available() {
            ui.colored_label(ERROR_COLOR, "No usable API key selected.");
        }
    }

    fn render_edit_controls(&mut self, ui: &mut egui::Ui, session: &mut StudioSession) {
        ui.heading("Refine");
        if let Some(artifact) = session.lineage().active_artifact() {
            ui.label(format!("Editing: {}", artifact.label()));
        }

        let mut instruction = session.config().edit_instruction().unwrap_or_default().to_owned();
        if ui
            .add(
                egui::TextEdit::multiline(&mut instruction)
                    .hint_text("Describe the change, e.g. add fire behind me")
                    .desired_rows(3),
            )
            .changed()
        {
            session.set_edit_instruction(instruction);
        }

        match session.config().selection() {
            Some(selection) => {
                ui.label(format!(
                    "Region: x={:.0}% y={:.0}% w={:.0}% h={:.0}%",
                    selection.x, selection.y, selection.width, selection.height
                ));
                if ui.button("Clear region").clicked() {
                    session.clear_selection();
                }
            }
            None => {
                ui.label("Drag on the preview to limit the edit to a region.");
            }
        }

        if ui.button("Back to create mode").clicked() {
            session.cancel_editing();
        }
    }

    fn render_history_pane(&mut self, ui: &mut egui::Ui, session: &mut StudioSession) {
        ui.heading("History");
        let active = session.lineage().active_target();
        let entries: Vec<(ArtifactId, String)> = session
            .lineage()
            .artifacts()
            .iter()
            .map(|artifact| (artifact.id(), artifact.label().to_owned()))
            .collect();

        if entries.is_empty() {
            ui.label("No thumbnails yet.");
            return;
        }

        egui::ScrollArea::vertical().show(ui, |ui| {
            for (artifact_id, label) in entries {
                ui.group(|ui| {
                    let marker = if active == Some(artifact_id) { "▶ " } else { "" };
                    ui.label(egui::RichText::new(format!("{marker}{label}")).strong());
                    ui.horizontal(|ui| {
                        if ui.button("Edit").clicked()
                            && let Err(error) = session.begin_editing(artifact_id)
                        {
                            self.status = error.to_string();
                        }
                        if ui.button("Download").clicked() {
                            self.export(session, artifact_id);
                        }
                        if ui.button("Delete").clicked() {
                            self.send(StudioCommand::DeleteArtifact { artifact_id });
                        }
                    });
                });
            }
        });
    }

    fn export(&mut self, session: &StudioSession, artifact_id: ArtifactId) {
        let Some(artifact) = session.lineage().get(artifact_id) else {
            return;
        };
        self.status = match export_artifact(artifact, &self.export_dir) {
            Ok(path) => format!("Saved {}", path.display()),
            Err(error) => format!("Download failed: {error}"),
        };
    }

    fn render_advisor(&mut self, ctx: &egui::Context, session: &StudioSession) {
        let mut open = self.advisor_open;
        egui::Window::new("Creative advisor")
            .open(&mut open)
            .default_width(360.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical()
                    .stick_to_bottom(true)
                    .max_height(320.0)
                    .show(ui, |ui| {
                        for message in &self.advisor_history {
                            let speaker = match message.role {
                                AdvisorRole::User => egui::RichText::new("You").strong(),
                                AdvisorRole::Advisor => {
                                    egui::RichText::new("Advisor").color(ADVISOR_COLOR).strong()
                                }
                            };
                            ui.label(speaker);
                            ui.label(&message.text);
                            ui.add_space(6.0);
                        }
                    });

                ui.separator();
                ui.horizontal(|ui| {
                    for prompt in ADVISOR_QUICK_PROMPTS {
                        if ui.small_button(prompt).clicked() {
                            self.advisor_input = prompt.to_owned();
                        }
                    }
                });
                ui.add(
                    egui::TextEdit::multiline(&mut self.advisor_input)
                        .hint_text("Ask for headline or background ideas...")
                        .desired_rows(2),
                );

                let busy = self.advisor_cancel.is_some();
                let can_send = !busy && !self.advisor_input.trim().is_empty();
                ui.horizontal(|ui| {
                    if ui.add_enabled(can_send, egui::Button::new("Send")).clicked() {
                        self.ask_advisor(session);
                    }
                    if busy {
                        ui.spinner();
                        if ui.button("Stop").clicked()
                            && let Some(cancel) = self.advisor_cancel.take()
                        {
                            cancel.cancel();
                        }
                    }
                });
            });
        self.advisor_open = open;
    }

    fn ask_advisor(&mut self, session: &StudioSession) {
        let question = self.advisor_input.trim().to_owned();
        self.advisor_input.clear();
        self.advisor_history.push(AdvisorMessage::user(question));

        let cancel = CancellationToken::new();
        self.advisor_cancel = Some(cancel.clone());
        self.advisor_history.push(AdvisorMessage::advisor(String::new()));
        self.send(StudioCommand::AskAdvisor {
            history: self.advisor_history.clone(),
            context: AdvisorContext::from(session.config()),
            cancel,
        });
    }
}

fn render_create_controls(ui: &mut egui::Ui, session: &mut StudioSession) {
    ui.heading("Style");
    let presets = session.presets().all().to_vec();
    let selected_preset = session.config().preset_id.clone();
    ui.horizontal_wrapped(|ui| {
        for preset in &presets {
            let selected = selected_preset.as_deref() == Some(preset.id.as_str());
            let text = format!("{} {}", preset.icon, preset.name);
            if ui
                .selectable_label(selected, text.trim())
                .on_hover_text(preset.description.as_str())
                .clicked()
            {
                session.apply_preset(&preset.id);
            }
        }
    });

    let config = session.config_mut();
    ui.label("Headline");
    ui.text_edit_singleline(&mut config.overlay_text);

    egui::ComboBox::from_label("Text style")
        .selected_text(config.text_style.label())
        .show_ui(ui, |ui| {
            for style in TextStyle::ALL {
                ui.selectable_value(&mut config.text_style, style, style.label());
            }
        });

    suggestion_field(ui, "Expression", &mut config.facial_expression, &SUGGESTED_EXPRESSIONS);
    suggestion_field(ui, "Action", &mut config.character_action, &SUGGESTED_ACTIONS);
    suggestion_field(ui, "Background", &mut config.background_details, &SUGGESTED_BACKGROUNDS);
}

fn suggestion_field(ui: &mut egui::Ui, label: &str, value: &mut String, suggestions: &[&str]) {
    ui.label(label);
    ui.text_edit_singleline(value);
    egui::ComboBox::from_id_salt(label)
        .selected_text("Suggestions")
        .show_ui(ui, |ui| {
            for suggestion in suggestions {
                if ui
                    .selectable_label(value.as_str() == *suggestion, *suggestion)
                    .clicked()
                {
                    *value = (*suggestion).to_owned();
                }
            }
        });
}

fn render_engine_controls(ui: &mut egui::Ui, session: &mut StudioSession) {
    let config = session.config_mut();
    egui::ComboBox::from_label("Aspect ratio")
        .selected_text(config.aspect_ratio.as_str())
        .show_ui(ui, |ui| {
            for ratio in AspectRatio::ALL {
                ui.selectable_value(&mut config.aspect_ratio, ratio, ratio.as_str());
            }
        });

    let mut high_fidelity = config.quality.is_high_fidelity();
    if ui.checkbox(&mut high_fidelity, "High-fidelity engine").changed() {
        config.quality = if high_fidelity {
            QualityTier::high_fidelity()
        } else {
            QualityTier::Fast
        };
    }

    if let QualityTier::HighFidelity {
        image_size,
        web_grounding,
    } = &mut config.quality
    {
        egui::ComboBox::from_label("Resolution")
            .selected_text(image_size.as_str())
            .show_ui(ui, |ui| {
                for size in ImageSize::ALL {
                    ui.selectable_value(image_size, size, size.as_str());
                }
            });
        ui.checkbox(web_grounding, "Web grounding");
    }
}

impl Drop for StudioApp {
    fn drop(&mut self) {
        if let Some(cancel) = self.advisor_cancel.take() {
            cancel.cancel();
        }
        let _ = self.command_tx.send(StudioCommand::Shutdown);
    }
}

impl eframe::App for StudioApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events();

        let shared = self.runtime.session().clone();
        let mut session = shared.lock();
        self.handle_dropped_files(ctx, &mut session);

        egui::TopBottomPanel::bottom("studio_status").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(&self.status);
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.button("Advisor").clicked() {
                        self.advisor_open = !self.advisor_open;
                    }
                });
            });
        });

        egui::SidePanel::left("studio_config_pane")
            .resizable(true)
            .default_width(340.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    self.render_config_pane(ui, &mut session);
                });
            });

        egui::SidePanel::right("studio_history_pane")
            .resizable(true)
            .default_width(240.0)
            .show(ctx, |ui| self.render_history_pane(ui, &mut session));

        let key = self.preview_key(&session);
        egui::CentralPanel::default().show(ctx, |ui| self.canvas.show(ui, key, &mut session));

        if self.advisor_open {
            self.render_advisor(ctx, &session);
        }

        drop(session);
        ctx.request_repaint_after(Duration::from_millis(120));
    }
}
