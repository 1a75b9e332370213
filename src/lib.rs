pub mod cli;
pub mod client;
pub mod config;
pub mod llm;
pub mod models;
pub mod server;

use cli::{ Args, ChatArgs, Command, ServeArgs };
use client::{ terminal, transport::HttpTransport, ChatSession };
use config::prompt::PromptContext;
use llm::{ chat::new_client as new_chat_client, parse_llm_type, LlmConfig };
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    match args.command {
        Command::Serve(serve_args) => serve(serve_args).await,
        Command::Chat(chat_args) => chat(chat_args).await,
    }
}

pub async fn serve(args: ServeArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Chat Model: {}", args.chat_model);
    info!("Chat Base URL: {}", args.chat_base_url.as_deref().unwrap_or("(provider default)"));
    info!("Max Tokens: {}", args.chat_max_tokens);
    info!("Temperature: {}", args.chat_temperature);
    info!("Prompt Path: {}", args.prompt_path.as_deref().unwrap_or("(built-in)"));
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let prompt = match &args.prompt_path {
        Some(path) => Arc::new(PromptContext::from_file(path)?),
        None => PromptContext::builtin(),
    };
    info!("Prompt context loaded ({} chars)", prompt.text().chars().count());

    let chat_config = LlmConfig {
        llm_type: parse_llm_type(&args.chat_llm_type)?,
        api_key: Some(args.chat_api_key.clone()).filter(|k| !k.trim().is_empty()),
        completion_model: Some(args.chat_model.clone()),
        base_url: args.chat_base_url.clone(),
        max_tokens: args.chat_max_tokens,
        temperature: args.chat_temperature,
    };
    let chat_client = new_chat_client(&chat_config)?;
    info!("Chat client ready: {} ({})", chat_client.provider(), chat_client.model());

    let server = Server::new(args, chat_client, prompt);
    server.run().await?;

    Ok(())
}

pub async fn chat(args: ChatArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("Gateway URL: {}", args.gateway_url);
    info!("Render Mode: {}", args.render);

    let transport = HttpTransport::new(&args.gateway_url)?;
    let session = ChatSession::new(Arc::new(transport)).with_render_mode(args.render);
    terminal::run_repl(session).await?;

    Ok(())
}
