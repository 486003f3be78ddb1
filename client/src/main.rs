mod cli;
mod options;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use env_logger::Env;
use futures::{pin_mut, StreamExt};
use log::{error, info};

use boost::{new_request_id, BoostOptions, BoostOrchestrator, BoostOutput};
use cli::{Cli, Commands};
use common::{get_env_usize, ConfigLoader};
use model::{ChatCompletionClient, ChatModel};
use options::ClientOptions;
use protocol::{BoostRequest, ChatMessage};

fn main() -> Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut builder = tokio::runtime::Builder::new_multi_thread();

    builder.enable_all();

    if let Some(worker_threads) = get_env_usize("TOKIO_THREADS") {
        builder.worker_threads(worker_threads);
    }

    info!("{:?}", builder);

    builder.build().unwrap().block_on(async_main())?;

    Ok(())
}

async fn async_main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Solve(solve_args) => {
            let config = ConfigLoader::new(&solve_args.config, "boost".to_string())?;
            let client_options: ClientOptions = config.load()?;
            let boost_options: BoostOptions = config.load()?;

            let request = BoostRequest {
                messages: vec![ChatMessage::user(solve_args.question.clone())],
                pulsar_boost: Some(!solve_args.no_boost),
                num_rollouts: solve_args.rollouts,
                max_depth: solve_args.depth,
                ..BoostRequest::default()
            };

            // The orchestrator never decides for itself whether to run; the
            // request's boost flag does.
            if request.boost_requested() {
                solve_boosted(&client_options, boost_options, request).await?
            } else {
                stream_completion(&client_options, request).await?
            }
        }
        Commands::Complete(complete_args) => {
            let config = ConfigLoader::new(&complete_args.config, "boost".to_string())?;
            let client_options: ClientOptions = config.load()?;

            let request = BoostRequest {
                messages: vec![ChatMessage::user(complete_args.question.clone())],
                ..BoostRequest::default()
            };

            stream_completion(&client_options, request).await?
        }
    }

    Ok(())
}

fn build_client(options: &ClientOptions) -> ChatCompletionClient {
    ChatCompletionClient::new(
        &options.api_base_url,
        &options.model_name,
        options.api_token.clone(),
    )
}

async fn solve_boosted(
    client_options: &ClientOptions,
    boost_options: BoostOptions,
    request: BoostRequest,
) -> Result<()> {
    let template = request.to_standard_request(&client_options.model_name);
    let model = Arc::new(ChatModel::new(build_client(client_options), template));
    let orchestrator = Arc::new(BoostOrchestrator::new(
        build_client(client_options),
        model,
        boost_options,
    ));

    let (output, mut chunks) = BoostOutput::channel();
    let request_id = new_request_id();

    let interrupt = orchestrator.interrupt();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt requested");
            interrupt.trigger();
        }
    });

    let driver = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator.process(&request, &request_id, &output).await;
        })
    };

    while let Some(chunk) = chunks.recv().await {
        print!("{}", chunk.to_sse());
    }
    println!("data: [DONE]");

    driver.await?;

    Ok(())
}

async fn stream_completion(client_options: &ClientOptions, request: BoostRequest) -> Result<()> {
    let client = build_client(client_options);
    let standard_request = request.to_standard_request(&client_options.model_name);

    let stream = client.stream(standard_request).await?;
    pin_mut!(stream);

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => print!("{}", chunk.to_sse()),
            Err(err) => {
                error!("Streaming failed: {}", err);
                break;
            }
        }
    }
    println!("data: [DONE]");

    Ok(())
}
