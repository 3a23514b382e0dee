use lambda_runtime::{Error, LambdaEvent, service_fn};
use serde_json::Value;

use eventgate::{
    Dispatcher, DispatcherConfig, ResponseEnvelope, TriggerEvent, TypedError, demo,
    logging::init_env_logger, response::error_envelope,
};

async fn handler(
    dispatcher: &Dispatcher,
    config: &DispatcherConfig,
    event: LambdaEvent<Value>,
) -> Result<ResponseEnvelope, Error> {
    let envelope = match TriggerEvent::from_value(config.trigger_kind, event.payload) {
        Ok(trigger) => dispatcher.dispatch(trigger).await,
        Err(err) => {
            log::error!("undecodable {} event: {err}", config.trigger_kind);
            error_envelope(&TypedError::bad_request(
                format!("invalid {} event: {err}", config.trigger_kind),
                None,
            ))
        }
    };
    Ok(envelope)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = DispatcherConfig::from_env();
    init_env_logger(config.is_lambda);

    let dispatcher = Dispatcher::from_config(&config, demo::routes(&config.stage)?);
    let (dispatcher, config) = (&dispatcher, &config);
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| async move {
        handler(dispatcher, config, event).await
    }))
    .await
}
