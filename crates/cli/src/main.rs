use clap::{Parser, Subcommand, ValueEnum};
use porto::api::{ApiClient, SandboxRequest};
use porto::config::{self, Config};
use porto::email::{EmailComposer, Formality, Greeting, Length, StyleOptions};
use porto::session::SessionManager;
use porto::store::{FileStore, TabStorage};
use porto::tab::{Role, Tab};
use porto::turn::{TurnController, TurnOutcome};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "porto")]
#[command(about = "Porto CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config, state directory).
    Init {
        /// Config file path (default: PORTO_CONFIG_PATH or ~/.porto/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Check whether the backend answers its health endpoint.
    Health {
        /// Config file path (default: PORTO_CONFIG_PATH or ~/.porto/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List the tools the backend agent can call.
    Tools {
        /// Config file path (default: PORTO_CONFIG_PATH or ~/.porto/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run one tool in the backend sandbox.
    Sandbox {
        /// Config file path (default: PORTO_CONFIG_PATH or ~/.porto/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Tool name as listed by `porto tools`.
        tool: String,

        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Gmail connection status and authorization.
    Gmail {
        /// Config file path (default: PORTO_CONFIG_PATH or ~/.porto/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[command(subcommand)]
        action: GmailAction,
    },

    /// Draft an email through the agent, and optionally send it.
    Email {
        /// Config file path (default: PORTO_CONFIG_PATH or ~/.porto/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        /// Keywords or topic the draft should cover.
        #[arg(long)]
        keywords: String,

        /// Comma-separated CC addresses.
        #[arg(long, default_value = "")]
        cc: String,

        /// Comma-separated BCC addresses.
        #[arg(long, default_value = "")]
        bcc: String,

        #[arg(long, value_enum, default_value_t = FormalityArg::Neutral)]
        formality: FormalityArg,

        #[arg(long, value_enum, default_value_t = LengthArg::Medium)]
        length: LengthArg,

        #[arg(long, value_enum, default_value_t = GreetingArg::Standard)]
        greeting: GreetingArg,

        /// Send the generated draft instead of only printing it.
        #[arg(long)]
        send: bool,
    },

    /// Chat with the backend agent in persistent tabs (interactive).
    Chat {
        /// Config file path (default: PORTO_CONFIG_PATH or ~/.porto/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Request tool execution traces (overrides chat.debugMode).
        #[arg(long)]
        debug: bool,
    },
}

#[derive(Subcommand)]
enum GmailAction {
    /// Show whether Gmail is connected.
    Status,
    /// Print the URL that grants the backend access to Gmail.
    Auth {
        #[arg(long, default_value = "http://localhost:3000/gmail/callback")]
        redirect_uri: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormalityArg {
    Formal,
    Informal,
    Neutral,
}

#[derive(Clone, Copy, ValueEnum)]
enum LengthArg {
    Short,
    Medium,
    Long,
}

#[derive(Clone, Copy, ValueEnum)]
enum GreetingArg {
    Formal,
    Informal,
    Standard,
    None,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("porto {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Health { config }) => match run_health(config).await {
            Ok(true) => {}
            Ok(false) => std::process::exit(1),
            Err(e) => {
                log::error!("health check failed: {}", e);
                std::process::exit(1);
            }
        },
        Some(Commands::Tools { config }) => {
            if let Err(e) = run_tools(config).await {
                log::error!("listing tools failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Sandbox { config, tool, args }) => {
            if let Err(e) = run_sandbox(config, tool, args).await {
                log::error!("sandbox failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gmail { config, action }) => {
            if let Err(e) = run_gmail(config, action).await {
                log::error!("gmail failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Email {
            config,
            from,
            to,
            keywords,
            cc,
            bcc,
            formality,
            length,
            greeting,
            send,
        }) => {
            let mut composer = EmailComposer::new();
            composer.form.sender_email = from;
            composer.form.recipient_email = to;
            composer.form.keywords = keywords;
            composer.form.cc = cc;
            composer.form.bcc = bcc;
            composer.form.style = StyleOptions {
                formality: match formality {
                    FormalityArg::Formal => Formality::Formal,
                    FormalityArg::Informal => Formality::Informal,
                    FormalityArg::Neutral => Formality::Neutral,
                },
                length: match length {
                    LengthArg::Short => Length::Short,
                    LengthArg::Medium => Length::Medium,
                    LengthArg::Long => Length::Long,
                },
                greeting: match greeting {
                    GreetingArg::Formal => Greeting::Formal,
                    GreetingArg::Informal => Greeting::Informal,
                    GreetingArg::Standard => Greeting::Standard,
                    GreetingArg::None => Greeting::None,
                },
            };
            if let Err(e) = run_email(config, composer, send).await {
                log::error!("email failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config, debug }) => {
            if let Err(e) = run_chat(config, debug).await {
                log::error!("chat failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let dir = porto::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

fn api_client(config: &Config) -> ApiClient {
    let base_url = config::resolve_api_base_url(config);
    log::debug!("using backend at {}", base_url);
    ApiClient::new(Some(base_url), Some(config.api.health_timeout()))
}

async fn run_health(config_path: Option<PathBuf>) -> anyhow::Result<bool> {
    let (config, _) = config::load_config(config_path)?;
    let api = api_client(&config);
    let healthy = api.health().await;
    println!(
        "{}: {}",
        api.base_url(),
        if healthy { "healthy" } else { "unreachable or unhealthy" }
    );
    Ok(healthy)
}

async fn run_tools(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let tools = api_client(&config).list_tools().await?;
    if tools.is_empty() {
        println!("no tools available");
    }
    for tool in tools {
        println!("{}  {}", tool.name, tool.description);
        for (name, spec) in &tool.parameters {
            let required = if tool.required.contains(name) { " (required)" } else { "" };
            println!(
                "    {}: {}{}  {}",
                name,
                spec.typ.as_deref().unwrap_or("any"),
                required,
                spec.description.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}

async fn run_sandbox(config_path: Option<PathBuf>, tool: String, args: String) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let args: serde_json::Value = serde_json::from_str(&args)
        .map_err(|e| anyhow::anyhow!("--args must be a JSON object: {}", e))?;
    let serde_json::Value::Object(args) = args else {
        anyhow::bail!("--args must be a JSON object");
    };
    let exec = api_client(&config)
        .execute_in_sandbox(&SandboxRequest { tool_name: tool, args })
        .await?;
    println!(
        "{} {} in {:.1} ms",
        exec.tool_name,
        if exec.success { "succeeded" } else { "failed" },
        exec.execution_time_ms
    );
    if let Some(result) = exec.result {
        println!("{}", result);
    }
    if let Some(error) = exec.error {
        println!("error: {}", error);
    }
    Ok(())
}

async fn run_gmail(config_path: Option<PathBuf>, action: GmailAction) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let api = api_client(&config);
    match action {
        GmailAction::Status => {
            let s = api.gmail_status().await?;
            println!(
                "authenticated: {}, credentials: {}, status: {}",
                s.authenticated, s.has_credentials, s.status
            );
            if let Some(e) = s.error {
                println!("error: {}", e);
            }
        }
        GmailAction::Auth { redirect_uri } => {
            println!("{}", api.gmail_auth_url(&redirect_uri).await?);
        }
    }
    Ok(())
}

async fn run_email(
    config_path: Option<PathBuf>,
    mut composer: EmailComposer,
    send: bool,
) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let api = api_client(&config);
    let draft = composer.generate_draft(&api, None).await?;
    println!("Subject: {}\n\n{}", draft.subject, draft.message);
    if send {
        composer.send(&api, None, &draft).await?;
        println!("\nemail handed to the agent for sending");
    }
    Ok(())
}

fn open_session(config: &Config, config_path: &std::path::Path) -> SessionManager {
    let dir = config::resolve_storage_dir(config, config_path);
    log::debug!("tab state in {}", dir.display());
    let storage =
        TabStorage::new(Box::new(FileStore::new(dir))).with_greeting(config::resolve_greeting(config));
    SessionManager::open(storage)
}

const HELP: &str = "commands:
  /new         open a new tab
  /close [N]   close tab N (default: the active tab)
  /tabs        list tabs
  /switch N    switch to tab N
  /clear       clear the active tab
  /debug       toggle debug mode
  /tools       tool calls of the last answer
  /info        debug info of the last answer
  /help        this help
  /exit        quit";

fn print_tab(tab: &Tab) {
    println!("-- {} --", tab.display_name());
    for m in &tab.messages {
        let prefix = match m.role {
            Role::User => ">",
            Role::Model | Role::Tool => "<",
        };
        println!("{} {}", prefix, m.text.trim());
    }
}

fn print_tabs(session: &SessionManager) {
    for (i, tab) in session.tabs().iter().enumerate() {
        let marker = if tab.id == session.active_tab_id() { "*" } else { " " };
        println!(
            "{} {}. {} ({} messages)",
            marker,
            i + 1,
            tab.display_name(),
            tab.user_message_count()
        );
    }
}

/// 1-based tab number to id.
fn tab_id_at(session: &SessionManager, arg: &str) -> Option<String> {
    let n: usize = arg.trim().parse().ok()?;
    session.tabs().get(n.checked_sub(1)?).map(|t| t.id.clone())
}

async fn run_chat(config_path: Option<PathBuf>, debug: bool) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (config, path) = config::load_config(config_path)?;
    let api = api_client(&config);
    if !api.health().await {
        log::warn!("backend at {} is not healthy; messages may fail", api.base_url());
    }
    let mut session = open_session(&config, &path);
    let mut turns = TurnController::new();
    let mut debug = debug || config.chat.debug_mode;

    print_tab(session.active_tab());
    println!("(/help for commands)");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        if let Some(command) = input.strip_prefix('/') {
            let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
            match name {
                "help" => println!("{}", HELP),
                "new" => {
                    session.new_tab();
                    print_tab(session.active_tab());
                }
                "close" => {
                    let id = if arg.trim().is_empty() {
                        Some(session.active_tab_id().to_string())
                    } else {
                        tab_id_at(&session, arg)
                    };
                    match id {
                        Some(id) => {
                            if let Some(notice) = session.close_tab(&id) {
                                println!("{}", notice);
                            }
                            print_tabs(&session);
                        }
                        None => println!("no such tab: {}", arg),
                    }
                }
                "tabs" => print_tabs(&session),
                "switch" => match tab_id_at(&session, arg) {
                    Some(id) => {
                        session.switch_tab(&id);
                        print_tab(session.active_tab());
                    }
                    None => println!("no such tab: {}", arg),
                },
                "clear" => println!("{}", session.clear_active_tab()),
                "debug" => {
                    debug = !debug;
                    println!("debug mode {}", if debug { "on" } else { "off" });
                }
                "tools" => {
                    let tab = session.active_tab();
                    if tab.tool_calls.is_empty() {
                        println!("no tool calls");
                    }
                    for call in &tab.tool_calls {
                        println!("{} {}", call.name, serde_json::Value::Object(call.args.clone()));
                    }
                }
                "info" => match &session.active_tab().debug_info {
                    Some(info) => println!("{}", serde_json::to_string_pretty(info)?),
                    None => println!("no debug info (enable /debug and send a message)"),
                },
                _ => println!("unknown command /{} (try /help)", name),
            }
            continue;
        }

        match turns.send_turn(&mut session, &api, input, debug).await {
            Some(TurnOutcome::Answered) | Some(TurnOutcome::Failed(_)) => {
                if let Some(m) = session.active_tab().messages.last() {
                    println!("< {}", m.text.trim());
                }
            }
            Some(TurnOutcome::Discarded) | None => {}
        }
    }

    Ok(())
}
