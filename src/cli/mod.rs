use clap::{ Parser, Subcommand };

use crate::client::RenderMode;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the completion gateway (POST /api/chat).
    Serve(ServeArgs),
    /// Chat with a running gateway from the terminal.
    Chat(ChatArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:3000")]
    pub server_addr: String,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (groq, openai)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "groq")]
    pub chat_llm_type: String,

    /// Full URL of the provider's chat completions endpoint. Defaults to the provider's public API.
    #[arg(long, env = "CHAT_BASE_URL")]
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider (e.g., GROQ_API_KEY value)
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Model name for chat completion
    #[arg(long, env = "CHAT_MODEL", default_value = "llama-3.1-8b-instant")]
    pub chat_model: String,

    /// Upper bound on tokens generated per reply.
    #[arg(long, env = "CHAT_MAX_TOKENS", default_value = "500")]
    pub chat_max_tokens: u32,

    /// Sampling temperature sent with every completion request.
    #[arg(long, env = "CHAT_TEMPERATURE", default_value = "0.7")]
    pub chat_temperature: f32,

    /// Optional path to a text file replacing the built-in persona prompt. Read once at startup.
    #[arg(long, env = "PROMPT_PATH")]
    pub prompt_path: Option<String>,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ChatArgs {
    /// Gateway chat endpoint to post conversations to.
    #[arg(long, env = "GATEWAY_URL", default_value = "http://127.0.0.1:3000/api/chat")]
    pub gateway_url: String,

    /// How replies are shown: buffered (drain, then type out) or incremental (as bytes arrive)
    #[arg(long, env = "RENDER_MODE", default_value = "buffered")]
    pub render: RenderMode,
}
