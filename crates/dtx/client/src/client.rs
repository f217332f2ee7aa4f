//! HTTP client for the transaction coordinator

use crate::config::XaClientConfig;
use crate::error::{ClientError, ClientResult};
use dtx_core::{
    classify_response, run_global_branch, BranchIdGenerator, BranchIdentity, CallbackDispatcher,
    Decision, DtxError, Phase, ResourceBranchDriver, ResourceProvider, TransBase, TransType,
};
use futures::future::BoxFuture;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// A global transaction in progress, handed to the business closure of
/// [`XaClient::global_transaction`].
#[derive(Debug, Clone)]
pub struct GlobalTrans {
    gid: String,
    ids: BranchIdGenerator,
}

impl GlobalTrans {
    pub fn new(gid: impl Into<String>) -> Self {
        Self {
            gid: gid.into(),
            ids: BranchIdGenerator::default(),
        }
    }

    pub fn gid(&self) -> &str {
        &self.gid
    }

    /// Id of the most recently called sub-branch.
    pub fn last_branch_id(&self) -> String {
        self.ids.current_sub_branch_id()
    }
}

#[derive(Debug, Deserialize)]
struct NewGidResponse {
    gid: String,
}

#[derive(Debug, Serialize)]
struct GlobalRequest<'a> {
    gid: &'a str,
    trans_type: TransType,
}

#[derive(Debug, Serialize)]
struct RegisterBranchRequest<'a> {
    gid: &'a str,
    branch_id: &'a str,
    trans_type: TransType,
    url: &'a str,
}

/// XA participant client: coordinator calls over HTTP, local branches through the
/// resource provider `P`.
pub struct XaClient<P> {
    http: Client,
    config: Arc<XaClientConfig>,
    driver: Arc<ResourceBranchDriver<P>>,
    dispatcher: Arc<CallbackDispatcher<P>>,
}

impl<P> Clone for XaClient<P> {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            config: self.config.clone(),
            driver: self.driver.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<P: ResourceProvider> XaClient<P> {
    pub fn new(config: XaClientConfig, provider: Arc<P>) -> ClientResult<Self> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        let driver = ResourceBranchDriver::new(provider.clone(), config.resource.clone());
        let dispatcher = CallbackDispatcher::new(provider, config.resource.clone());

        Ok(Self {
            http,
            config: Arc::new(config),
            driver: Arc::new(driver),
            dispatcher: Arc::new(dispatcher),
        })
    }

    pub fn config(&self) -> &XaClientConfig {
        &self.config
    }

    pub fn driver(&self) -> &ResourceBranchDriver<P> {
        &self.driver
    }

    pub fn dispatcher(&self) -> &CallbackDispatcher<P> {
        &self.dispatcher
    }

    /// Ask the coordinator for a fresh global transaction id.
    pub async fn new_gid(&self) -> ClientResult<String> {
        let body = send_classified(self.http.get(self.url("newGid"))).await?;
        let response: NewGidResponse = serde_json::from_str(&body)?;
        if response.gid.is_empty() {
            let message = format!("coordinator returned no gid: {}", body);
            return Err(DtxError::Remote(message).into());
        }
        Ok(response.gid)
    }

    /// Run `business` as global transaction `gid`.
    ///
    /// The coordinator is told to prepare first. When `business` succeeds it is told to
    /// submit, otherwise to abort; a panic in `business` aborts and then keeps unwinding.
    pub async fn global_transaction<B, BF>(&self, gid: &str, business: B) -> ClientResult<()>
    where
        B: FnOnce(GlobalTrans) -> BF,
        BF: Future<Output = ClientResult<()>>,
    {
        let trans = GlobalTrans::new(gid);
        run_global_branch(
            &BranchIdentity::global(gid),
            |phase| self.call_phase(gid, phase),
            move || business(trans),
        )
        .await
    }

    /// Run `business` as the local XA branch `trans`.
    ///
    /// After `business` succeeds, and while the branch is still open, the branch is
    /// registered with the coordinator under the configured notify URL. A failed
    /// registration leaves the branch unprepared.
    pub async fn local_transaction<F>(&self, trans: &TransBase, business: F) -> ClientResult<()>
    where
        F: for<'h> FnOnce(&'h mut P::Handle) -> BoxFuture<'h, ClientResult<()>> + Send + 'static,
        P: 'static,
    {
        let client = self.clone();
        let registered = trans.clone();
        self.driver
            .run_local_branch(trans.identity(), move |handle| {
                Box::pin(async move {
                    business(handle).await?;
                    client.register_branch(&registered).await
                })
            })
            .await
    }

    /// [`Self::local_transaction`] for a branch described by request query parameters.
    pub async fn local_transaction_from_query<F>(
        &self,
        params: &HashMap<String, String>,
        business: F,
    ) -> ClientResult<()>
    where
        F: for<'h> FnOnce(&'h mut P::Handle) -> BoxFuture<'h, ClientResult<()>> + Send + 'static,
        P: 'static,
    {
        let trans = TransBase::from_query(params)?;
        self.local_transaction(&trans, business).await
    }

    /// Call a sub-branch of `trans` at `url` with a JSON `body`.
    ///
    /// Allocates the next sub-branch id and returns the branch's response body.
    pub async fn call_branch<T>(
        &self,
        trans: &mut GlobalTrans,
        body: &T,
        url: &str,
    ) -> ClientResult<String>
    where
        T: Serialize + Sync + ?Sized,
    {
        let branch_id = trans.ids.next_sub_branch_id()?;
        let request = self
            .http
            .post(url)
            .query(&[
                ("gid", trans.gid()),
                ("branch_id", branch_id.as_str()),
                ("trans_type", TransType::Xa.as_str()),
                ("op", "action"),
            ])
            .json(body);
        send_classified(request).await
    }

    /// Apply a coordinator decision delivered to the notify URL.
    pub async fn handle_callback(
        &self,
        gid: &str,
        branch_id: &str,
        action: &str,
    ) -> ClientResult<()> {
        let identity = BranchIdentity::new(gid, branch_id)?;
        let decision = action.parse::<Decision>()?;
        self.dispatcher.apply_decision(&identity, decision).await?;
        Ok(())
    }

    async fn call_phase(&self, gid: &str, phase: Phase) -> ClientResult<()> {
        let request = GlobalRequest {
            gid,
            trans_type: TransType::Xa,
        };
        send_classified(self.http.post(self.url(phase.as_str())).json(&request))
            .await?;
        info!(gid, phase = %phase, "coordinator accepted phase");
        Ok(())
    }

    async fn register_branch(&self, trans: &TransBase) -> ClientResult<()> {
        let request = RegisterBranchRequest {
            gid: trans.gid(),
            branch_id: trans.branch_id(),
            trans_type: TransType::Xa,
            url: &self.config.notify_url,
        };
        send_classified(self.http.post(self.url("registerBranch")).json(&request))
            .await?;
        debug!(
            gid = trans.gid(),
            branch_id = trans.branch_id(),
            "branch registered"
        );
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.server.trim_end_matches('/'), path)
    }
}

async fn send_classified(request: RequestBuilder) -> Result<String, ClientError> {
    let response = request.send().await?;
    let status = response.status().as_u16();
    let url = response.url().to_string();
    let body = response.text().await?;
    debug!(url = %url, status, "remote responded");
    classify_response(status, &body)?;
    Ok(body)
}
