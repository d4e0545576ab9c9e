//! Porto Desktop: egui app state and UI.

use eframe::egui;
use porto::api::{ApiClient, ApiError, ChatReply, SandboxExecution, SandboxRequest, Tool};
use porto::config::{self, Config};
use porto::draft::Draft;
use porto::email::{EmailComposer, EmailError, Field, FieldErrors, Formality, Greeting, Length};
use porto::session::SessionManager;
use porto::store::{FileStore, MemoryStore, TabStorage};
use porto::tab::{Message, Role, ToolCall};
use porto::turn::{PendingTurn, TurnController, TurnOutcome};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::mpsc;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

const CHAT_INPUT_HEIGHT: f32 = 90.0;
const CHAT_MESSAGES_MIN_HEIGHT: f32 = 80.0;
const LOG_BUFFER_MAX_LINES: usize = 2000;
const HEALTH_PROBE_INTERVAL: Duration = Duration::from_secs(30);
const TOAST_DURATION: Duration = Duration::from_secs(4);
const GMAIL_REDIRECT_URI: &str = "http://localhost:3000/gmail/callback";

/// Ring buffer of log lines for the Logs screen. Written by DesktopLogger.
static LOG_LINES: OnceLock<Mutex<VecDeque<String>>> = OnceLock::new();

fn log_buffer() -> &'static Mutex<VecDeque<String>> {
    LOG_LINES.get_or_init(|| Mutex::new(VecDeque::new()))
}

fn push_log_line(line: String) {
    if let Ok(mut buf) = log_buffer().lock() {
        buf.push_back(line);
        while buf.len() > LOG_BUFFER_MAX_LINES {
            buf.pop_front();
        }
    }
}

/// Logger that appends to LOG_LINES for display in the Logs screen.
struct DesktopLogger;

impl log::Log for DesktopLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        // reqwest/hyper internals drown out the app's own lines
        metadata.target().starts_with("porto")
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        push_log_line(format!(
            "{} [{}] {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

static LOGGER: DesktopLogger = DesktopLogger;

/// Run `job` on its own thread with a current-thread tokio runtime; the result arrives on the
/// returned receiver. A dropped receiver (app closed) just discards the result.
fn run_in_background<T, F, Fut>(job: F) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = T>,
{
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                log::error!("failed to start background runtime: {}", e);
                return;
            }
        };
        let _ = tx.send(rt.block_on(job()));
    });
    rx
}

/// Non-blocking read: `Some(Ok)` with a result, `Some(Err)` when the worker died, `None` while pending.
fn poll<T>(rx: &mpsc::Receiver<T>) -> Option<Result<T, String>> {
    match rx.try_recv() {
        Ok(v) => Some(Ok(v)),
        Err(mpsc::TryRecvError::Empty) => None,
        Err(mpsc::TryRecvError::Disconnected) => Some(Err("background worker stopped".to_string())),
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
enum Screen {
    #[default]
    Chat,
    Email,
    Logs,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ToastKind {
    Info,
    Error,
}

struct Toast {
    text: String,
    kind: ToastKind,
    shown_at: Instant,
}

/// Tab list actions collected while drawing, applied afterwards.
enum TabAction {
    New,
    Switch(String),
    Close(String),
}

#[derive(Default)]
struct EmailState {
    composer: EmailComposer,
    errors: FieldErrors,
    /// Editable copy of the last generated draft.
    draft: Option<Draft>,
    show_optional: bool,
    generating: Option<mpsc::Receiver<Result<Draft, EmailError>>>,
    sending: Option<mpsc::Receiver<Result<(), EmailError>>>,
    gmail_status: Option<String>,
    gmail_auth_url: Option<String>,
    gmail_rx: Option<mpsc::Receiver<Result<(String, Option<String>), ApiError>>>,
}

#[derive(Default)]
struct ToolsState {
    tools: Vec<Tool>,
    error: Option<String>,
    loading: Option<mpsc::Receiver<Result<Vec<Tool>, ApiError>>>,
    /// Tool opened in the sandbox window.
    selected: Option<Tool>,
    args: String,
    running: Option<mpsc::Receiver<Result<SandboxExecution, ApiError>>>,
    result: Option<Result<SandboxExecution, String>>,
}

pub struct PortoApp {
    api: ApiClient,
    session: SessionManager,
    turns: TurnController,
    /// In-flight chat turn and the channel its reply arrives on.
    chat_turn: Option<(PendingTurn, mpsc::Receiver<Result<ChatReply, ApiError>>)>,
    chat_input: String,
    debug_mode: bool,
    show_debug_window: bool,
    current_screen: Screen,
    backend_healthy: Option<bool>,
    health_rx: Option<mpsc::Receiver<bool>>,
    last_probe: Option<Instant>,
    toast: Option<Toast>,
    email: EmailState,
    tools: ToolsState,
}

impl PortoApp {
    /// Space between the main screen title and the content below.
    const SCREEN_TITLE_BOTTOM_SPACING: f32 = 18.0;
    /// Space between the bottom of the content and the window edge.
    const SCREEN_FOOTER_SPACING: f32 = 48.0;

    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let _ = LOG_LINES.get_or_init(|| Mutex::new(VecDeque::new()));
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Debug);

        let (config, config_path) = match config::load_config(None) {
            Ok(loaded) => loaded,
            Err(e) => {
                log::error!("config error, using defaults: {:#}", e);
                (Config::default(), config::default_config_path())
            }
        };
        let api = ApiClient::new(
            Some(config::resolve_api_base_url(&config)),
            Some(config.api.health_timeout()),
        );
        let greeting = config::resolve_greeting(&config);
        let state_dir = config::resolve_storage_dir(&config, &config_path);
        let storage = if config_path.exists() {
            TabStorage::new(Box::new(FileStore::new(state_dir)))
        } else {
            log::warn!(
                "no config at {}; tabs will not be saved (run `porto init`)",
                config_path.display()
            );
            TabStorage::new(Box::new(MemoryStore::new()))
        };
        let session = SessionManager::open(storage.with_greeting(greeting));
        log::info!(
            "desktop started with {} tab(s), backend {}",
            session.tabs().len(),
            api.base_url()
        );

        let mut app = Self {
            api,
            session,
            turns: TurnController::new(),
            chat_turn: None,
            chat_input: String::new(),
            debug_mode: config.chat.debug_mode,
            show_debug_window: false,
            current_screen: Screen::default(),
            backend_healthy: None,
            health_rx: None,
            last_probe: None,
            toast: None,
            email: EmailState::default(),
            tools: ToolsState::default(),
        };
        app.refresh_tools();
        app
    }

    fn notify(&mut self, text: impl Into<String>, kind: ToastKind) {
        self.toast = Some(Toast {
            text: text.into(),
            kind,
            shown_at: Instant::now(),
        });
    }

    fn is_busy(&self) -> bool {
        self.chat_turn.is_some()
            || self.health_rx.is_some()
            || self.tools.loading.is_some()
            || self.tools.running.is_some()
            || self.email.generating.is_some()
            || self.email.sending.is_some()
            || self.email.gmail_rx.is_some()
    }

    // ---- background work -------------------------------------------------

    fn maybe_probe_health(&mut self) {
        if self.health_rx.is_some() {
            return;
        }
        if self.last_probe.is_some_and(|t| t.elapsed() < HEALTH_PROBE_INTERVAL) {
            return;
        }
        self.last_probe = Some(Instant::now());
        let api = self.api.clone();
        self.health_rx = Some(run_in_background(move || async move { api.health().await }));
    }

    fn poll_health(&mut self) {
        let Some(rx) = &self.health_rx else { return };
        if let Some(result) = poll(rx) {
            self.health_rx = None;
            let healthy = result.unwrap_or(false);
            if self.backend_healthy != Some(healthy) {
                log::info!("backend {}", if healthy { "healthy" } else { "unreachable" });
            }
            self.backend_healthy = Some(healthy);
        }
    }

    /// Start a chat turn in the active tab; the request runs on a background thread.
    fn start_chat_turn(&mut self) {
        if self.chat_turn.is_some() {
            return;
        }
        let text = self.chat_input.trim().to_string();
        let Some(pending) = self.turns.begin(&mut self.session, &text, self.debug_mode) else {
            return;
        };
        self.chat_input.clear();
        let api = self.api.clone();
        let request = pending.request.clone();
        let rx = run_in_background(move || async move { api.chat(&request).await });
        self.chat_turn = Some((pending, rx));
    }

    /// Poll for the chat turn result and reconcile it into its tab. Call each frame.
    fn poll_chat_turn(&mut self) {
        let Some((_, rx)) = &self.chat_turn else { return };
        let Some(received) = poll(rx) else { return };
        let Some((pending, _)) = self.chat_turn.take() else { return };
        let result = received.unwrap_or_else(|e| Err(ApiError::Api(e)));
        match self.turns.finish(&mut self.session, pending, result) {
            TurnOutcome::Failed(ApiError::ConversationTooLong(msg)) => {
                self.notify(msg, ToastKind::Error);
            }
            TurnOutcome::Answered | TurnOutcome::Failed(_) | TurnOutcome::Discarded => {}
        }
    }

    fn refresh_tools(&mut self) {
        if self.tools.loading.is_some() {
            return;
        }
        let api = self.api.clone();
        self.tools.loading = Some(run_in_background(move || async move { api.list_tools().await }));
    }

    fn poll_tools(&mut self) {
        if let Some(rx) = &self.tools.loading {
            if let Some(result) = poll(rx) {
                self.tools.loading = None;
                match result.map_err(|e| e.to_string()).and_then(|r| r.map_err(|e| e.to_string())) {
                    Ok(tools) => {
                        log::debug!("loaded {} tool(s)", tools.len());
                        self.tools.tools = tools;
                        self.tools.error = None;
                    }
                    Err(e) => {
                        log::warn!("loading tools failed: {}", e);
                        self.tools.error = Some(e);
                    }
                }
            }
        }
        if let Some(rx) = &self.tools.running {
            if let Some(result) = poll(rx) {
                self.tools.running = None;
                self.tools.result =
                    Some(result.and_then(|r| r.map_err(|e| e.to_string())));
            }
        }
    }

    fn run_sandbox(&mut self) {
        let Some(tool) = &self.tools.selected else { return };
        if self.tools.running.is_some() {
            return;
        }
        let args = match serde_json::from_str::<serde_json::Value>(&self.tools.args) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) => {
                self.tools.result = Some(Err("arguments must be a JSON object".to_string()));
                return;
            }
            Err(e) => {
                self.tools.result = Some(Err(format!("invalid JSON: {}", e)));
                return;
            }
        };
        let request = SandboxRequest {
            tool_name: tool.name.clone(),
            args,
        };
        let api = self.api.clone();
        self.tools.result = None;
        self.tools.running = Some(run_in_background(move || async move {
            api.execute_in_sandbox(&request).await
        }));
    }

    fn generate_draft(&mut self) {
        if self.email.generating.is_some() || self.email.composer.is_busy() {
            return;
        }
        if let Err(errors) = self.email.composer.form.validate() {
            self.email.errors = errors;
            self.notify("Please fix the highlighted fields", ToastKind::Error);
            return;
        }
        self.email.errors = FieldErrors::default();
        let composer = self.email.composer.clone();
        let api = self.api.clone();
        let thread_id = self.session.active_tab().thread_id.clone();
        self.email.generating = Some(run_in_background(move || async move {
            composer.generate_draft(&api, thread_id).await
        }));
    }

    fn send_email(&mut self) {
        if self.email.sending.is_some() || self.email.composer.is_busy() {
            return;
        }
        let Some(draft) = self.email.draft.clone() else {
            self.notify("Generate a draft first", ToastKind::Error);
            return;
        };
        if let Err(e) = self.email.composer.form.send_prompt(&draft) {
            self.notify(e.to_string(), ToastKind::Error);
            return;
        }
        let mut composer = self.email.composer.clone();
        let api = self.api.clone();
        let thread_id = self.session.active_tab().thread_id.clone();
        self.email.sending = Some(run_in_background(move || async move {
            composer.send(&api, thread_id, &draft).await
        }));
    }

    fn check_gmail(&mut self, with_auth_url: bool) {
        if self.email.gmail_rx.is_some() {
            return;
        }
        let api = self.api.clone();
        self.email.gmail_rx = Some(run_in_background(move || async move {
            let status = api.gmail_status().await?;
            let label = match (&status.error, status.authenticated) {
                (Some(e), _) => format!("{} ({})", status.status, e),
                (None, true) => "connected".to_string(),
                (None, false) if !status.has_credentials => "no credentials configured".to_string(),
                (None, false) => "not connected".to_string(),
            };
            let url = if with_auth_url && !status.authenticated {
                Some(api.gmail_auth_url(GMAIL_REDIRECT_URI).await?)
            } else {
                None
            };
            Ok::<_, ApiError>((label, url))
        }));
    }

    fn poll_email(&mut self) {
        if let Some(rx) = &self.email.generating {
            if let Some(result) = poll(rx) {
                self.email.generating = None;
                match result.map_err(|e| e.to_string()).and_then(|r| r.map_err(|e| e.to_string())) {
                    Ok(draft) => {
                        self.email.draft = Some(draft);
                        self.notify("Draft generated", ToastKind::Info);
                    }
                    Err(e) => self.notify(format!("Generating the draft failed: {}", e), ToastKind::Error),
                }
            }
        }
        if let Some(rx) = &self.email.sending {
            if let Some(result) = poll(rx) {
                self.email.sending = None;
                match result.map_err(|e| e.to_string()).and_then(|r| r.map_err(|e| e.to_string())) {
                    Ok(()) => {
                        self.email.composer.reset();
                        self.email.draft = None;
                        self.email.errors = FieldErrors::default();
                        self.email.show_optional = false;
                        self.notify("Email sent", ToastKind::Info);
                    }
                    Err(e) => self.notify(format!("Sending the email failed: {}", e), ToastKind::Error),
                }
            }
        }
        if let Some(rx) = &self.email.gmail_rx {
            if let Some(result) = poll(rx) {
                self.email.gmail_rx = None;
                match result.map_err(|e| e.to_string()).and_then(|r| r.map_err(|e| e.to_string())) {
                    Ok((status, url)) => {
                        self.email.gmail_status = Some(status);
                        if url.is_some() {
                            self.email.gmail_auth_url = url;
                        }
                    }
                    Err(e) => self.email.gmail_status = Some(format!("unavailable: {}", e)),
                }
            }
        }
    }

    // ---- tabs ------------------------------------------------------------

    fn apply_tab_action(&mut self, action: TabAction) {
        match action {
            TabAction::New => {
                self.session.new_tab();
            }
            TabAction::Switch(id) => {
                self.session.switch_tab(&id);
            }
            TabAction::Close(id) => {
                if let Some(notice) = self.session.close_tab(&id) {
                    self.notify(notice.to_string(), ToastKind::Info);
                }
            }
        }
    }

    fn ui_tabs_panel(&mut self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.horizontal(|ui| {
            ui.heading("Tabs");
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button("+ New").clicked() {
                    self.apply_tab_action(TabAction::New);
                }
            });
        });
        ui.add_space(12.0);

        let mut action = None;
        let active = self.session.active_tab_id().to_string();
        egui::ScrollArea::vertical()
            .id_source("tabs_scroll")
            .max_height(ui.available_height() * 0.5)
            .show(ui, |ui| {
                for tab in self.session.tabs() {
                    ui.horizontal(|ui| {
                        let label = format!("{}  ({})", tab.display_name(), tab.user_message_count());
                        if ui.selectable_label(tab.id == active, label).clicked() {
                            action = Some(TabAction::Switch(tab.id.clone()));
                        }
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            if ui.small_button("x").on_hover_text("Close tab").clicked() {
                                action = Some(TabAction::Close(tab.id.clone()));
                            }
                        });
                    });
                }
            });
        if let Some(action) = action {
            self.apply_tab_action(action);
        }

        ui.add_space(18.0);
        ui.separator();
        self.ui_tools_list(ui);
    }

    fn ui_tools_list(&mut self, ui: &mut egui::Ui) {
        ui.add_space(12.0);
        ui.horizontal(|ui| {
            ui.heading("Tools");
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if self.tools.loading.is_some() {
                    ui.add(egui::Spinner::new());
                } else if ui.small_button("Refresh").clicked() {
                    self.refresh_tools();
                }
            });
        });
        ui.add_space(8.0);
        if let Some(err) = &self.tools.error {
            ui.colored_label(egui::Color32::RED, err.as_str());
        } else if self.tools.tools.is_empty() && self.tools.loading.is_none() {
            ui.label("No tools available.");
        }
        let mut open = None;
        egui::ScrollArea::vertical()
            .id_source("tools_scroll")
            .show(ui, |ui| {
                for tool in &self.tools.tools {
                    let r = ui
                        .selectable_label(false, tool.name.as_str())
                        .on_hover_text(tool.description.as_str());
                    if r.clicked() {
                        open = Some(tool.clone());
                    }
                }
            });
        if let Some(tool) = open {
            self.tools.args = sandbox_args_template(&tool);
            self.tools.result = None;
            self.tools.selected = Some(tool);
        }
    }

    // ---- chat ------------------------------------------------------------

    fn render_tool_calls(ui: &mut egui::Ui, tool_calls: &[ToolCall]) {
        egui::CollapsingHeader::new(format!("🔧 {} tool call(s)", tool_calls.len()))
            .default_open(false)
            .show(ui, |ui| {
                for (idx, tc) in tool_calls.iter().enumerate() {
                    if idx > 0 {
                        ui.add_space(4.0);
                    }
                    let label = if tc.mcp == Some(true) {
                        format!("Tool: {} (MCP)", tc.name)
                    } else {
                        format!("Tool: {}", tc.name)
                    };
                    ui.label(egui::RichText::new(label).strong());
                    if let Some(desc) = tc.schema.as_ref().and_then(|s| s.description.as_deref()) {
                        ui.label(desc);
                    }
                    let args = serde_json::Value::Object(tc.args.clone());
                    ui.label(format!(
                        "Arguments: {}",
                        serde_json::to_string_pretty(&args).unwrap_or_else(|_| args.to_string())
                    ));
                }
            });
    }

    /// Renders a single chat message (frame, role-based fill, content, tool calls).
    fn render_chat_message(ui: &mut egui::Ui, m: &Message) {
        let is_user = m.role == Role::User;
        let frame = egui::Frame::none()
            .fill(if is_user {
                ui.style().visuals.extreme_bg_color
            } else {
                ui.style().visuals.panel_fill
            })
            .stroke(egui::Stroke::new(
                1.0,
                ui.style().visuals.widgets.noninteractive.bg_stroke.color,
            ))
            .rounding(egui::Rounding::same(8.0))
            .inner_margin(egui::Margin::same(8.0));

        frame.show(ui, |ui| {
            if is_user {
                ui.label(egui::RichText::new(&m.text).strong());
            } else if m.is_streaming {
                ui.horizontal(|ui| {
                    ui.add(egui::Spinner::new());
                    ui.label("Thinking...");
                });
            } else {
                ui.label(m.text.as_str());
                if let Some(tool_calls) = m.tool_calls.as_deref().filter(|t| !t.is_empty()) {
                    ui.add_space(8.0);
                    ui.separator();
                    ui.add_space(4.0);
                    Self::render_tool_calls(ui, tool_calls);
                }
            }
            if let Some(ts) = m.timestamp {
                ui.label(
                    egui::RichText::new(ts.with_timezone(&chrono::Local).format("%H:%M").to_string())
                        .small()
                        .weak(),
                );
            }
        });
    }

    /// Messages fill the space above; input and controls are fixed at the bottom.
    fn ui_chat(&mut self, ui: &mut egui::Ui) {
        let can_send = !self.turns.is_loading();
        let row_height = ui.spacing().interact_size.y + 8.0;
        let bottom_section_height =
            CHAT_INPUT_HEIGHT + 8.0 + row_height + Self::SCREEN_FOOTER_SPACING;
        let messages_height =
            (ui.available_height() - bottom_section_height).max(CHAT_MESSAGES_MIN_HEIGHT);

        let messages_rect = ui
            .allocate_exact_size(
                egui::vec2(ui.available_width(), messages_height),
                egui::Sense::hover(),
            )
            .0;
        let mut messages_ui = ui.child_ui(messages_rect, egui::Layout::top_down(egui::Align::Min));
        let tab = self.session.active_tab();
        egui::ScrollArea::vertical()
            .id_source(("messages", tab.id.as_str()))
            .stick_to_bottom(true)
            .show(&mut messages_ui, |ui| {
                let content_width = ui.available_width();
                ui.allocate_exact_size(egui::vec2(content_width, 0.0), egui::Sense::hover());
                for m in &tab.messages {
                    Self::render_chat_message(ui, m);
                    ui.add_space(8.0);
                }
            });

        ui.add_space(8.0);
        let response = ui
            .add_enabled_ui(can_send, |ui| {
                ui.add_sized(
                    [ui.available_width(), CHAT_INPUT_HEIGHT],
                    egui::TextEdit::multiline(&mut self.chat_input)
                        .hint_text("Ask about projects, experience, skills... (Ctrl+Enter to send)"),
                )
            })
            .inner;
        ui.add_space(8.0);

        let mut send_now = false;
        ui.horizontal(|ui| {
            ui.checkbox(&mut self.debug_mode, "Debug mode");
            if ui.button("Debug info").clicked() {
                self.show_debug_window = true;
            }
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.add_enabled(can_send, egui::Button::new("Send")).clicked() {
                    send_now = true;
                }
                if ui.add_enabled(can_send, egui::Button::new("Clear chat")).clicked() {
                    let notice = self.session.clear_active_tab();
                    self.notify(notice.to_string(), ToastKind::Info);
                }
            });
        });
        if can_send && response.has_focus() {
            let enter = ui.input(|i| {
                (i.modifiers.command || i.modifiers.ctrl) && i.key_pressed(egui::Key::Enter)
            });
            if enter {
                send_now = true;
            }
        }
        if send_now {
            self.start_chat_turn();
        }
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
    }

    fn ui_debug_window(&mut self, ctx: &egui::Context) {
        let mut open = self.show_debug_window;
        let tab = self.session.active_tab();
        egui::Window::new("Debug info")
            .open(&mut open)
            .default_width(520.0)
            .vscroll(true)
            .show(ctx, |ui| {
                if !tab.tool_calls.is_empty() {
                    ui.label(egui::RichText::new("Last answer").strong());
                    Self::render_tool_calls(ui, &tab.tool_calls);
                    ui.add_space(8.0);
                }
                let Some(info) = &tab.debug_info else {
                    ui.label("No debug info for this tab. Enable debug mode and send a message.");
                    return;
                };
                ui.label(format!(
                    "{} tool call(s), {} model response(s)",
                    info.total_tool_calls.unwrap_or(info.tool_executions.len() as u32),
                    info.total_model_responses.unwrap_or(info.model_responses.len() as u32),
                ));
                ui.add_space(8.0);
                for (i, exec) in info.tool_executions.iter().enumerate() {
                    egui::CollapsingHeader::new(format!(
                        "{}. {} ({:.1} ms)",
                        i + 1,
                        exec.tool_name,
                        exec.execution_time_ms
                    ))
                    .id_source(("exec", i))
                    .show(ui, |ui| {
                        let args = serde_json::Value::Object(exec.args.clone());
                        ui.label(format!("Arguments: {}", args));
                        ui.label(format!("At: {}", exec.timestamp));
                        if let Some(err) = &exec.error {
                            ui.colored_label(egui::Color32::RED, err.as_str());
                        }
                        ui.label(
                            egui::RichText::new(&exec.result).family(egui::FontFamily::Monospace),
                        );
                    });
                }
                for (i, text) in info.model_responses.iter().enumerate() {
                    egui::CollapsingHeader::new(format!("Model response {}", i + 1))
                        .id_source(("model", i))
                        .show(ui, |ui| {
                            ui.label(egui::RichText::new(text).family(egui::FontFamily::Monospace));
                        });
                }
                if let Some(agent) = &info.agent_response {
                    egui::CollapsingHeader::new("Agent response").show(ui, |ui| {
                        ui.label(
                            egui::RichText::new(
                                serde_json::to_string_pretty(agent).unwrap_or_default(),
                            )
                            .family(egui::FontFamily::Monospace),
                        );
                    });
                }
            });
        self.show_debug_window = open;
    }

    fn ui_sandbox_window(&mut self, ctx: &egui::Context) {
        let Some(tool) = self.tools.selected.clone() else { return };
        let mut open = true;
        let mut run = false;
        egui::Window::new(format!("Sandbox: {}", tool.name))
            .open(&mut open)
            .default_width(420.0)
            .show(ctx, |ui| {
                if !tool.description.is_empty() {
                    ui.label(tool.description.as_str());
                    ui.add_space(8.0);
                }
                for (name, spec) in &tool.parameters {
                    let required = if tool.required.contains(name) { "*" } else { "" };
                    ui.label(format!(
                        "{}{}: {}  {}",
                        name,
                        required,
                        spec.typ.as_deref().unwrap_or("any"),
                        spec.description.as_deref().unwrap_or("")
                    ));
                }
                ui.add_space(8.0);
                ui.label("Arguments (JSON)");
                ui.add(
                    egui::TextEdit::multiline(&mut self.tools.args)
                        .code_editor()
                        .desired_rows(6)
                        .desired_width(f32::INFINITY),
                );
                ui.horizontal(|ui| {
                    let idle = self.tools.running.is_none();
                    if ui.add_enabled(idle, egui::Button::new("Run")).clicked() {
                        run = true;
                    }
                    if !idle {
                        ui.add(egui::Spinner::new());
                    }
                });
                match &self.tools.result {
                    Some(Ok(exec)) => {
                        ui.add_space(8.0);
                        ui.label(format!(
                            "{} in {:.1} ms",
                            if exec.success { "Succeeded" } else { "Failed" },
                            exec.execution_time_ms
                        ));
                        if let Some(err) = &exec.error {
                            ui.colored_label(egui::Color32::RED, err.as_str());
                        }
                        if let Some(result) = &exec.result {
                            egui::ScrollArea::vertical().max_height(240.0).show(ui, |ui| {
                                ui.label(
                                    egui::RichText::new(result).family(egui::FontFamily::Monospace),
                                );
                            });
                        }
                    }
                    Some(Err(e)) => {
                        ui.add_space(8.0);
                        ui.colored_label(egui::Color32::RED, e.as_str());
                    }
                    None => {}
                }
            });
        if run {
            self.run_sandbox();
        }
        if !open {
            self.tools.selected = None;
        }
    }

    // ---- email -----------------------------------------------------------

    fn field(ui: &mut egui::Ui, label: &str, value: &mut String, error: Option<&str>) {
        ui.label(label);
        ui.add(egui::TextEdit::singleline(value).desired_width(f32::INFINITY));
        if let Some(err) = error {
            ui.colored_label(egui::Color32::RED, err);
        }
        ui.add_space(8.0);
    }

    fn ui_email_screen(&mut self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.heading("Email");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        ui.horizontal(|ui| {
            ui.label(format!(
                "Gmail: {}",
                self.email.gmail_status.as_deref().unwrap_or("unknown")
            ));
            if self.email.gmail_rx.is_some() {
                ui.add(egui::Spinner::new());
            } else {
                if ui.small_button("Check").clicked() {
                    self.check_gmail(false);
                }
                if ui.small_button("Connect").clicked() {
                    self.check_gmail(true);
                }
            }
        });
        if let Some(url) = self.email.gmail_auth_url.clone() {
            ui.horizontal(|ui| {
                ui.hyperlink_to("Open Google authorization", &url);
                if ui.small_button("Copy link").clicked() {
                    ui.output_mut(|o| o.copied_text = url.clone());
                }
            });
        }
        ui.add_space(12.0);

        let errors = self.email.errors.clone();
        egui::ScrollArea::vertical().show(ui, |ui| {
            let form = &mut self.email.composer.form;
            Self::field(ui, "From *", &mut form.sender_email, errors.get(Field::SenderEmail));
            Self::field(ui, "To *", &mut form.recipient_email, errors.get(Field::RecipientEmail));
            ui.label("Keywords / topic *");
            ui.add(
                egui::TextEdit::multiline(&mut form.keywords)
                    .desired_rows(3)
                    .desired_width(f32::INFINITY),
            );
            if let Some(err) = errors.get(Field::Keywords) {
                ui.colored_label(egui::Color32::RED, err);
            }
            ui.add_space(8.0);

            ui.horizontal(|ui| {
                egui::ComboBox::from_id_source("formality")
                    .selected_text(match form.style.formality {
                        Formality::Formal => "Formal",
                        Formality::Informal => "Informal",
                        Formality::Neutral => "Neutral",
                    })
                    .show_ui(ui, |ui| {
                        ui.selectable_value(&mut form.style.formality, Formality::Formal, "Formal");
                        ui.selectable_value(&mut form.style.formality, Formality::Neutral, "Neutral");
                        ui.selectable_value(&mut form.style.formality, Formality::Informal, "Informal");
                    });
                egui::ComboBox::from_id_source("length")
                    .selected_text(match form.style.length {
                        Length::Short => "Short",
                        Length::Medium => "Medium",
                        Length::Long => "Long",
                    })
                    .show_ui(ui, |ui| {
                        ui.selectable_value(&mut form.style.length, Length::Short, "Short");
                        ui.selectable_value(&mut form.style.length, Length::Medium, "Medium");
                        ui.selectable_value(&mut form.style.length, Length::Long, "Long");
                    });
                egui::ComboBox::from_id_source("greeting")
                    .selected_text(match form.style.greeting {
                        Greeting::Formal => "Formal greeting",
                        Greeting::Informal => "Informal greeting",
                        Greeting::Standard => "Standard greeting",
                        Greeting::None => "No greeting",
                    })
                    .show_ui(ui, |ui| {
                        ui.selectable_value(&mut form.style.greeting, Greeting::Formal, "Formal greeting");
                        ui.selectable_value(&mut form.style.greeting, Greeting::Standard, "Standard greeting");
                        ui.selectable_value(&mut form.style.greeting, Greeting::Informal, "Informal greeting");
                        ui.selectable_value(&mut form.style.greeting, Greeting::None, "No greeting");
                    });
            });
            ui.add_space(8.0);

            ui.checkbox(&mut self.email.show_optional, "CC / BCC");
            if self.email.show_optional {
                Self::field(ui, "CC", &mut form.cc, errors.get(Field::Cc));
                Self::field(ui, "BCC", &mut form.bcc, errors.get(Field::Bcc));
            }

            let generating = self.email.generating.is_some();
            ui.horizontal(|ui| {
                if ui
                    .add_enabled(!generating, egui::Button::new("Generate draft"))
                    .clicked()
                {
                    self.generate_draft();
                }
                if generating {
                    ui.add(egui::Spinner::new());
                }
            });

            if let Some(draft) = &mut self.email.draft {
                ui.add_space(16.0);
                ui.separator();
                ui.label(format!("Subject ({} chars)", draft.subject.chars().count()));
                ui.add(egui::TextEdit::singleline(&mut draft.subject).desired_width(f32::INFINITY));
                ui.add_space(8.0);
                ui.label(format!("Message ({} chars)", draft.message.chars().count()));
                ui.add(
                    egui::TextEdit::multiline(&mut draft.message)
                        .desired_rows(12)
                        .desired_width(f32::INFINITY),
                );
                ui.add_space(8.0);
                let sending = self.email.sending.is_some();
                ui.horizontal(|ui| {
                    if ui.add_enabled(!sending, egui::Button::new("Send email")).clicked() {
                        self.send_email();
                    }
                    if sending {
                        ui.add(egui::Spinner::new());
                    }
                });
            }
        });
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
    }

    fn ui_logs_screen(&self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.heading("Logs");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        let lines: Vec<String> = log_buffer()
            .lock()
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default();

        let scroll_height = (ui.available_height() - Self::SCREEN_FOOTER_SPACING).max(0.0);
        egui::ScrollArea::vertical()
            .max_height(scroll_height)
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for line in &lines {
                    ui.label(egui::RichText::new(line.as_str()).family(egui::FontFamily::Monospace));
                }
                if lines.is_empty() {
                    ui.label("No log output yet.");
                }
            });
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
    }

    fn ui_toast(&mut self, ctx: &egui::Context) {
        let expired = self
            .toast
            .as_ref()
            .is_some_and(|t| t.shown_at.elapsed() > TOAST_DURATION);
        if expired {
            self.toast = None;
        }
        let Some(toast) = &self.toast else { return };
        egui::Area::new("toast")
            .anchor(egui::Align2::RIGHT_BOTTOM, egui::vec2(-24.0, -24.0))
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    let color = match toast.kind {
                        ToastKind::Info => ui.style().visuals.text_color(),
                        ToastKind::Error => egui::Color32::RED,
                    };
                    ui.colored_label(color, toast.text.as_str());
                });
            });
        ctx.request_repaint_after(Duration::from_millis(250));
    }
}

/// `{"param": null, ...}` skeleton for a tool's parameters.
fn sandbox_args_template(tool: &Tool) -> String {
    let map: serde_json::Map<String, serde_json::Value> = tool
        .parameters
        .keys()
        .map(|k| (k.clone(), serde_json::Value::Null))
        .collect();
    serde_json::to_string_pretty(&serde_json::Value::Object(map)).unwrap_or_else(|_| "{}".to_string())
}

impl eframe::App for PortoApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.maybe_probe_health();
        self.poll_health();
        self.poll_chat_turn();
        self.poll_tools();
        self.poll_email();

        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                .show(ui, |ui| {
                    ui.add_space(16.0);
                    ui.horizontal(|ui| {
                        ui.heading("Porto");
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            let (text, color) = match self.backend_healthy {
                                Some(true) => ("Backend online", egui::Color32::GREEN),
                                Some(false) => ("Backend offline", egui::Color32::RED),
                                None => ("Checking backend...", ui.style().visuals.weak_text_color()),
                            };
                            ui.colored_label(color, text).on_hover_text(self.api.base_url());
                        });
                    });
                    ui.add_space(16.0);
                });
        });

        let current_screen = &mut self.current_screen;
        egui::SidePanel::left("sidebar")
            .resizable(false)
            .exact_width(140.0)
            .show(ctx, |ui| {
                egui::Frame::none()
                    .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                    .show(ui, |ui| {
                        ui.add_space(24.0);
                        for (screen, label) in
                            [(Screen::Chat, "Chat"), (Screen::Email, "Email"), (Screen::Logs, "Logs")]
                        {
                            if ui.selectable_label(*current_screen == screen, label).clicked() {
                                *current_screen = screen;
                            }
                            ui.add_space(12.0);
                        }
                    });
            });

        if self.current_screen == Screen::Chat {
            egui::SidePanel::right("tabs_panel")
                .resizable(false)
                .exact_width(240.0)
                .show(ctx, |ui| {
                    egui::Frame::none()
                        .inner_margin(egui::Margin::symmetric(16.0, 0.0))
                        .show(ui, |ui| self.ui_tabs_panel(ui));
                });
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                .show(ui, |ui| match self.current_screen {
                    Screen::Chat => {
                        ui.add_space(24.0);
                        ui.heading(self.session.active_tab().display_name());
                        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);
                        if self.backend_healthy == Some(false) {
                            ui.colored_label(
                                egui::Color32::YELLOW,
                                "The backend is not reachable; messages will fail until it is back.",
                            );
                            ui.add_space(8.0);
                        }
                        self.ui_chat(ui);
                    }
                    Screen::Email => self.ui_email_screen(ui),
                    Screen::Logs => self.ui_logs_screen(ui),
                });
        });

        if self.show_debug_window {
            self.ui_debug_window(ctx);
        }
        self.ui_sandbox_window(ctx);
        self.ui_toast(ctx);

        if self.is_busy() {
            ctx.request_repaint_after(Duration::from_millis(100));
        } else {
            ctx.request_repaint_after(HEALTH_PROBE_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use porto::tab::ParamSpec;
    use std::collections::BTreeMap;

    #[test]
    fn sandbox_template_lists_parameters() {
        let mut parameters = BTreeMap::new();
        parameters.insert("limit".to_string(), ParamSpec::default());
        parameters.insert("query".to_string(), ParamSpec::default());
        let tool = Tool {
            name: "search".to_string(),
            description: String::new(),
            parameters,
            required: vec![],
        };
        let v: serde_json::Value = serde_json::from_str(&sandbox_args_template(&tool)).unwrap();
        assert_eq!(v, serde_json::json!({ "limit": null, "query": null }));
    }

    #[test]
    fn background_result_arrives() {
        let rx = run_in_background(|| async { 41 + 1 });
        let v = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn log_buffer_is_bounded() {
        for i in 0..(LOG_BUFFER_MAX_LINES + 10) {
            push_log_line(format!("line {}", i));
        }
        let buf = log_buffer().lock().unwrap();
        assert_eq!(buf.len(), LOG_BUFFER_MAX_LINES);
        assert_eq!(buf.back().map(String::as_str), Some(format!("line {}", LOG_BUFFER_MAX_LINES + 9).as_str()));
    }
}
