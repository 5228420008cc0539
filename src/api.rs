use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::{Error, JobRecord, ReportBundle};

type Reply<T> = oneshot::Sender<Result<T, Error>>;

/// Requests crossing the client/service boundary. The transport here is an
/// in-process channel; a network front-end would carry the same shapes.
pub enum ApiRequest {
    Submit {
        owner: String,
        sources: Vec<String>,
        model_hint: String,
        reply: Reply<Vec<Uuid>>,
    },
    List {
        owner: String,
        reply: Reply<Vec<JobRecord>>,
    },
    Trash {
        owner: String,
        job_id: Uuid,
        reply: Reply<()>,
    },
    Restore {
        owner: String,
        job_id: Uuid,
        reply: Reply<()>,
    },
    Purge {
        owner: String,
        job_id: Uuid,
        reply: Reply<()>,
    },
    ClearTrash {
        owner: String,
        reply: Reply<usize>,
    },
    Export {
        owner: String,
        job_id: Uuid,
        reply: Reply<ReportBundle>,
    },
}

/// Cloneable handle the client side uses to reach the job service. Each call
/// is an independent request; dropping the returned future abandons the reply
/// without touching anything.
#[derive(Clone)]
pub struct ApiHandle {
    tx: mpsc::UnboundedSender<ApiRequest>,
}

impl ApiHandle {
    pub fn new(tx: mpsc::UnboundedSender<ApiRequest>) -> Self {
        ApiHandle { tx }
    }

    async fn call<T>(
        &self,
        request: ApiRequest,
        rx: oneshot::Receiver<Result<T, Error>>,
    ) -> Result<T, Error> {
        self.tx
            .send(request)
            .map_err(|_| Error::Transient("job service is gone".into()))?;
        rx.await
            .map_err(|_| Error::Transient("job service dropped the request".into()))?
    }

    pub async fn submit(
        &self,
        owner: &str,
        sources: Vec<String>,
        model_hint: &str,
    ) -> Result<Vec<Uuid>, Error> {
        let (reply, rx) = oneshot::channel();
        self.call(
            ApiRequest::Submit {
                owner: owner.to_string(),
                sources,
                model_hint: model_hint.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn list(&self, owner: &str) -> Result<Vec<JobRecord>, Error> {
        let (reply, rx) = oneshot::channel();
        self.call(
            ApiRequest::List {
                owner: owner.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn trash(&self, owner: &str, job_id: Uuid) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.call(
            ApiRequest::Trash {
                owner: owner.to_string(),
                job_id,
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn restore(&self, owner: &str, job_id: Uuid) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.call(
            ApiRequest::Restore {
                owner: owner.to_string(),
                job_id,
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn purge(&self, owner: &str, job_id: Uuid) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.call(
            ApiRequest::Purge {
                owner: owner.to_string(),
                job_id,
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn clear_trash(&self, owner: &str) -> Result<usize, Error> {
        let (reply, rx) = oneshot::channel();
        self.call(
            ApiRequest::ClearTrash {
                owner: owner.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn export(&self, owner: &str, job_id: Uuid) -> Result<ReportBundle, Error> {
        let (reply, rx) = oneshot::channel();
        self.call(
            ApiRequest::Export {
                owner: owner.to_string(),
                job_id,
                reply,
            },
            rx,
        )
        .await
    }
}
