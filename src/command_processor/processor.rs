use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::bus::ProducerRegistry;
use crate::error::HandlerError;
use crate::mapper::MessageMapperRegistry;
use crate::message::{Id, Message, Request, RequestContext, RequestContextFactory};
use crate::outbox::{ClearResult, OutboxError, OutboxProducerMediator, UnitOfWork};
use crate::pipeline::PipelineBuilder;
use crate::scheduler::{RequestSchedulerType, ScheduledJob, Scheduler, SchedulerId};

use super::builder::{ClearMode, CommandProcessorBuilder};

/// Dispatches requests to handler pipelines, the outbox and the scheduler.
///
/// All caches and registries are owned by the instance; [`reset`](Self::reset)
/// drops the pipeline cache. Clones share them.
#[derive(Clone)]
pub struct CommandProcessor {
    pipelines: Arc<PipelineBuilder>,
    mappers: Arc<MessageMapperRegistry>,
    producers: ProducerRegistry,
    context_factory: Arc<dyn RequestContextFactory>,
    mediator: Option<Arc<OutboxProducerMediator>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    clear_mode: ClearMode,
}

impl CommandProcessor {
    pub(crate) fn new(
        pipelines: PipelineBuilder,
        mappers: Arc<MessageMapperRegistry>,
        producers: ProducerRegistry,
        context_factory: Arc<dyn RequestContextFactory>,
        mediator: Option<Arc<OutboxProducerMediator>>,
        scheduler: Option<Arc<dyn Scheduler>>,
        clear_mode: ClearMode,
    ) -> Self {
        Self {
            pipelines: Arc::new(pipelines),
            mappers,
            producers,
            context_factory,
            mediator,
            scheduler,
            clear_mode,
        }
    }

    pub fn builder() -> CommandProcessorBuilder {
        CommandProcessorBuilder::new()
    }

    pub fn create_context(&self) -> RequestContext {
        self.context_factory.create()
    }

    pub fn pipelines(&self) -> &PipelineBuilder {
        &self.pipelines
    }

    pub fn mappers(&self) -> &MessageMapperRegistry {
        &self.mappers
    }

    pub fn mediator(&self) -> Option<&Arc<OutboxProducerMediator>> {
        self.mediator.as_ref()
    }

    /// Drop every cached pipeline; the next dispatch rebuilds them.
    pub fn reset(&self) {
        self.pipelines.clear_cache();
    }

    /// Dispatch to the single handler registered for `R`.
    pub async fn send<R: Request>(&self, request: &mut R) -> Result<(), HandlerError> {
        let mut ctx = self.create_context();
        self.send_with_context(request, &mut ctx).await
    }

    /// Zero or several registered handlers is a configuration error.
    pub async fn send_with_context<R: Request>(
        &self,
        request: &mut R,
        ctx: &mut RequestContext,
    ) -> Result<(), HandlerError> {
        let request_type = std::any::type_name::<R>();
        let pipelines = self.pipelines.build::<R>()?;
        let pipeline = match pipelines.as_slice() {
            [pipeline] => pipeline,
            [] => {
                return Err(HandlerError::configuration(format!(
                    "no handler registered for {request_type}"
                )))
            }
            many => {
                return Err(HandlerError::configuration(format!(
                    "{} handlers registered for {request_type}, send needs exactly one",
                    many.len()
                )))
            }
        };

        let span = self.dispatch_span("send", request, ctx);
        pipeline.handle(request, ctx).instrument(span).await
    }

    /// Dispatch to every handler registered for `R`.
    pub async fn publish<R: Request>(&self, event: &mut R) -> Result<(), HandlerError> {
        let mut ctx = self.create_context();
        self.publish_with_context(event, &mut ctx).await
    }

    /// Every subscriber runs even if an earlier one fails. One failure is
    /// returned as itself, several as `HandlerError::Aggregate`.
    pub async fn publish_with_context<R: Request>(
        &self,
        event: &mut R,
        ctx: &mut RequestContext,
    ) -> Result<(), HandlerError> {
        let pipelines = self.pipelines.build::<R>()?;
        if pipelines.is_empty() {
            debug!(request_type = std::any::type_name::<R>(), "no subscribers for event");
            return Ok(());
        }

        let span = self.dispatch_span("publish", event, ctx);
        let mut failures = Vec::new();
        for pipeline in pipelines.iter() {
            if let Err(err) = pipeline.handle(event, ctx).instrument(span.clone()).await {
                warn!(pipeline = %pipeline, error = %err, "subscriber failed");
                failures.push(err);
            }
        }
        HandlerError::collect(failures)
    }

    /// Deposit `request` in the outbox, then clear it.
    pub async fn post<R: Request>(&self, request: &R) -> Result<Id, HandlerError> {
        let ctx = self.create_context();
        self.post_with_context(request, &ctx).await
    }

    /// A failed send leaves the message outstanding; it is not reported as an error.
    pub async fn post_with_context<R: Request>(
        &self,
        request: &R,
        ctx: &RequestContext,
    ) -> Result<Id, HandlerError> {
        let id = self.deposit_with_context(request, ctx, None).await?;
        let ids = vec![id.clone()];
        match self.clear_mode {
            ClearMode::Immediate => {
                self.clear_outbox_with_context(&ids, ctx).await?;
            }
            ClearMode::Background => {
                let mediator = Arc::clone(self.require_mediator()?);
                let ctx = self.create_context();
                tokio::spawn(async move {
                    if let Err(err) = mediator
                        .clear_outbox(&ids, &ctx, &CancellationToken::new())
                        .await
                    {
                        warn!(error = %err, "background clear failed");
                    }
                });
            }
        }
        Ok(id)
    }

    /// Map `request` and write it to the outbox without sending it.
    ///
    /// With a unit of work the write only becomes visible when it commits.
    pub async fn deposit<R: Request>(
        &self,
        request: &R,
        tx: Option<&mut UnitOfWork>,
    ) -> Result<Id, HandlerError> {
        let ctx = self.create_context();
        self.deposit_with_context(request, &ctx, tx).await
    }

    pub async fn deposit_with_context<R: Request>(
        &self,
        request: &R,
        ctx: &RequestContext,
        tx: Option<&mut UnitOfWork>,
    ) -> Result<Id, HandlerError> {
        let mediator = self.require_mediator()?;
        let message = self.map_to_message(request)?;
        let id = message.id().clone();
        mediator.add_to_outbox(message, ctx, tx).await?;
        Ok(id)
    }

    /// Deposit several requests together. Without a caller unit of work the
    /// batch is written in one of its own, so either all or none are stored.
    pub async fn deposit_batch<R: Request>(
        &self,
        requests: &[R],
        tx: Option<&mut UnitOfWork>,
    ) -> Result<Vec<Id>, HandlerError> {
        let mediator = self.require_mediator()?;
        let ctx = self.create_context();
        let messages = requests
            .iter()
            .map(|request| self.map_to_message(request))
            .collect::<Result<Vec<_>, _>>()?;
        let ids = messages.iter().map(|message| message.id().clone()).collect();
        mediator.ensure_capacity(messages.len()).await?;

        match tx {
            Some(tx) => stage(mediator, messages, &ctx, tx).await?,
            None => {
                let mut own = UnitOfWork::new();
                stage(mediator, messages, &ctx, &mut own).await?;
                own.commit()?;
            }
        }
        Ok(ids)
    }

    /// Send the given outbox entries now.
    pub async fn clear_outbox(&self, ids: &[Id]) -> Result<ClearResult, HandlerError> {
        let ctx = self.create_context();
        self.clear_outbox_with_context(ids, &ctx).await
    }

    pub async fn clear_outbox_with_context(
        &self,
        ids: &[Id],
        ctx: &RequestContext,
    ) -> Result<ClearResult, HandlerError> {
        self.require_mediator()?
            .clear_outbox(ids, ctx, &CancellationToken::new())
            .await
    }

    /// Stops before the next send once `cancel` fires.
    pub async fn clear_outbox_with_cancellation(
        &self,
        ids: &[Id],
        cancel: &CancellationToken,
    ) -> Result<ClearResult, HandlerError> {
        let ctx = self.create_context();
        self.require_mediator()?.clear_outbox(ids, &ctx, cancel).await
    }

    /// Send up to `max_count` outstanding messages at least `min_age` old.
    pub async fn clear_outstanding(
        &self,
        max_count: usize,
        min_age: Duration,
        bulk: bool,
    ) -> Result<ClearResult, HandlerError> {
        self.clear_outstanding_with_cancellation(max_count, min_age, bulk, &CancellationToken::new())
            .await
    }

    pub async fn clear_outstanding_with_cancellation(
        &self,
        max_count: usize,
        min_age: Duration,
        bulk: bool,
        cancel: &CancellationToken,
    ) -> Result<ClearResult, HandlerError> {
        let ctx = self.create_context();
        self.require_mediator()?
            .clear_outstanding_from_outbox(max_count, min_age, bulk, &ctx, cancel)
            .await
    }

    /// Dispatch `request` through `send`, `publish` or `post` at `at`.
    ///
    /// A posted request is mapped now so a missing mapper or publication
    /// fails here rather than when the schedule fires.
    pub async fn schedule_at<R: Request>(
        &self,
        request: R,
        scheduler_type: RequestSchedulerType,
        at: SystemTime,
    ) -> Result<SchedulerId, HandlerError> {
        let scheduler = self.require_scheduler()?;
        let job = self.request_job(request, scheduler_type)?;
        Ok(scheduler.schedule(job, at).await?)
    }

    pub async fn schedule_after<R: Request>(
        &self,
        request: R,
        scheduler_type: RequestSchedulerType,
        delay: Duration,
    ) -> Result<SchedulerId, HandlerError> {
        self.schedule_at(request, scheduler_type, SystemTime::now() + delay)
            .await
    }

    /// Deposit `message` in the outbox at `at` and clear it. A failed send
    /// leaves it outstanding like any other outbox message.
    pub async fn schedule_message(
        &self,
        message: Message,
        at: SystemTime,
    ) -> Result<SchedulerId, HandlerError> {
        let scheduler = self.require_scheduler()?;
        let job = self.message_job(message)?;
        Ok(scheduler.schedule(job, at).await?)
    }

    pub async fn schedule_message_after(
        &self,
        message: Message,
        delay: Duration,
    ) -> Result<SchedulerId, HandlerError> {
        self.schedule_message(message, SystemTime::now() + delay).await
    }

    /// `false` if the schedule is unknown or already fired.
    pub async fn reschedule(&self, id: &SchedulerId, at: SystemTime) -> Result<bool, HandlerError> {
        Ok(self.require_scheduler()?.reschedule(id, at).await?)
    }

    /// `false` if the schedule is unknown or already fired.
    pub async fn cancel_scheduled(&self, id: &SchedulerId) -> Result<bool, HandlerError> {
        Ok(self.require_scheduler()?.cancel(id).await?)
    }

    fn request_job<R: Request>(
        &self,
        request: R,
        scheduler_type: RequestSchedulerType,
    ) -> Result<ScheduledJob, HandlerError> {
        if scheduler_type == RequestSchedulerType::Post {
            self.require_mediator()?;
            self.map_to_message(&request)?;
        }
        let processor = self.clone();
        let description = format!("{scheduler_type:?} {}", std::any::type_name::<R>());
        Ok(ScheduledJob::new(description, async move {
            let mut request = request;
            match scheduler_type {
                RequestSchedulerType::Send => processor.send(&mut request).await,
                RequestSchedulerType::Publish => processor.publish(&mut request).await,
                RequestSchedulerType::Post => processor.post(&request).await.map(|_| ()),
            }
        }))
    }

    fn message_job(&self, message: Message) -> Result<ScheduledJob, HandlerError> {
        if message.topic().is_empty() {
            return Err(OutboxError::MissingTopic(message.id().clone()).into());
        }
        let mediator = Arc::clone(self.require_mediator()?);
        let ctx = self.create_context();
        let description = format!("message {}", message.id());
        Ok(ScheduledJob::new(description, async move {
            let id = message.id().clone();
            mediator.add_to_outbox(message, &ctx, None).await?;
            mediator
                .clear_outbox(&[id], &ctx, &CancellationToken::new())
                .await?;
            Ok(())
        }))
    }

    fn map_to_message<R: Request>(&self, request: &R) -> Result<Message, HandlerError> {
        let request_type = std::any::type_name::<R>();
        let publication = self.producers.find_publication::<R>().ok_or_else(|| {
            HandlerError::configuration(format!("no publication found for {request_type}"))
        })?;
        self.mappers
            .require::<R>()?
            .map_to_message(request, &publication)
    }

    fn require_mediator(&self) -> Result<&Arc<OutboxProducerMediator>, HandlerError> {
        self.mediator
            .as_ref()
            .ok_or_else(|| HandlerError::configuration("no outbox configured"))
    }

    fn require_scheduler(&self) -> Result<&Arc<dyn Scheduler>, HandlerError> {
        self.scheduler
            .as_ref()
            .ok_or_else(|| HandlerError::configuration("no scheduler configured"))
    }

    fn dispatch_span<R: Request>(
        &self,
        operation: &'static str,
        request: &R,
        ctx: &mut RequestContext,
    ) -> tracing::Span {
        if ctx.correlation_id().is_none() {
            ctx.set_correlation_id(request.id().clone());
        }
        let span = info_span!(
            "dispatch",
            operation,
            request_type = std::any::type_name::<R>(),
            request_id = %request.id(),
        );
        ctx.set_span(span.clone());
        span
    }
}

async fn stage(
    mediator: &OutboxProducerMediator,
    messages: Vec<Message>,
    ctx: &RequestContext,
    tx: &mut UnitOfWork,
) -> Result<(), HandlerError> {
    for message in messages {
        if message.topic().is_empty() {
            return Err(OutboxError::MissingTopic(message.id().clone()).into());
        }
        mediator.outbox().add(message, ctx, Some(&mut *tx)).await?;
    }
    Ok(())
}
