use crate::quota::{ClientId, QuotaService};
use crate::tts::{QuotaExceeded, SynthesizedAudio, TtsClient, TtsError, TtsRequest, UPGRADE_URL};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

const LOG_TARGET: &str = "tts::quota";
const ANONYMOUS_CLIENT: &str = "anonymous";

/// Speech gateway that charges requests without a user credential to the free tier.
pub struct QuotaGatedTtsClient<P, Q>
where
    P: TtsClient + Clone,
    Q: QuotaService,
{
    primary: P,
    quota: Arc<Q>,
}

impl<P, Q> QuotaGatedTtsClient<P, Q>
where
    P: TtsClient + Clone,
    Q: QuotaService,
{
    pub fn new(primary: P, quota: Arc<Q>) -> Self {
        Self { primary, quota }
    }

    pub fn quota(&self) -> &Q {
        &self.quota
    }
}

impl<P, Q> Clone for QuotaGatedTtsClient<P, Q>
where
    P: TtsClient + Clone,
    Q: QuotaService,
{
    fn clone(&self) -> Self {
        Self {
            primary: self.primary.clone(),
            quota: Arc::clone(&self.quota),
        }
    }
}

impl<P, Q> TtsClient for QuotaGatedTtsClient<P, Q>
where
    P: TtsClient + Clone + Send + Sync + 'static,
    Q: QuotaService + 'static,
{
    fn synthesize(&self, request: TtsRequest) -> BoxFuture<'_, Result<SynthesizedAudio, TtsError>> {
        async move {
            if request.credential.is_some() {
                return self.primary.synthesize(request).await;
            }

            let limits = self.quota.limits();
            let len = request.text.chars().count();
            if len > limits.max_chars_per_request {
                return Err(TtsError::TextTooLong {
                    len,
                    max: limits.max_chars_per_request,
                });
            }

            let anonymous = ClientId(ANONYMOUS_CLIENT.to_string());
            let client = request.client_id.as_ref().unwrap_or(&anonymous);
            let decision = self.quota.check_and_increment(client);
            if !decision.allowed {
                tracing::warn!(
                    target: LOG_TARGET,
                    client = %client.as_str(),
                    "free tier limit reached, rejecting synthesis"
                );
                return Err(TtsError::RateLimited(QuotaExceeded {
                    message: format!(
                        "You've used all {} free voice generations for today.",
                        limits.daily_requests
                    ),
                    remaining: 0,
                    limit: Some(limits.daily_requests),
                    reset_at: Some(decision.reset_at),
                    upgrade_url: UPGRADE_URL.to_string(),
                }));
            }

            tracing::debug!(
                target: LOG_TARGET,
                client = %client.as_str(),
                remaining = decision.remaining,
                "free tier request accepted"
            );
            self.primary.synthesize(request).await
        }
        .boxed()
    }
}
