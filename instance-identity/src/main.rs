// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use anyhow::{Context, Result};
use clap::Parser;
use instance_identity::authenticator::InstanceAuthenticator;
use instance_identity::configuration::{Command, IdentityOptions};
use instance_identity::encoding;
use instance_identity::models::{InstanceIdentity, PresignedRequest};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        // this needs to be set to remove duplicated information in the log.
        .with_current_span(false)
        // this needs to be set to false, otherwise ANSI color codes will
        // show up in a confusing manner in CloudWatch logs.
        .with_ansi(false)
        // disabling time is handy because CloudWatch will add the ingestion time.
        .without_time()
        // remove the name of the function from every log entry
        .with_target(false)
        // keep stdout for the encoded output
        .with_writer(std::io::stderr)
        .init();

    // get configuration options from environment variables
    let options = IdentityOptions::parse();

    tracing::debug!("[identity] {:?}", &options);

    match options.command.clone().unwrap_or(Command::Presign) {
        Command::Presign => presign(&options).await,
        Command::DecodeRequest { value } => {
            let request = PresignedRequest::decode(&value)?;
            println!("{}", serde_json::to_string_pretty(&request)?);
            Ok(())
        }
        Command::DecodeIdentity { value } => {
            let identity: InstanceIdentity = encoding::decode(&value)?;
            println!("{}", serde_json::to_string_pretty(&identity)?);
            Ok(())
        }
    }
}

async fn presign(options: &IdentityOptions) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("[identity] interrupted, canceling");
            on_signal.cancel();
        }
    });

    let authenticator = match InstanceAuthenticator::from_options(options).await {
        Ok(authenticator) => authenticator,
        Err(err) => {
            tracing::error!("[identity] unable to initialize: {}", err);
            std::process::exit(1);
        }
    };

    let request = match authenticator.authenticate(&cancel).await {
        Ok(request) => request,
        Err(err) if err.is_fatal() => {
            // there is no degraded mode without an instance description or signer
            tracing::error!("[identity] {}", err);
            std::process::exit(1);
        }
        Err(err) => return Err(err).context("unable to authenticate instance"),
    };

    tracing::info!("[identity] presigned {} {}", request.method, request.url);

    println!("{}", request.encode()?);

    Ok(())
}
