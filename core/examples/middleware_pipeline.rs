// herald/examples/middleware_pipeline.rs

use herald::{
  EventBroker, HeraldError, Param, Pipeline, PipelineControl, Registration, ServiceCollection, Step, StepArgs,
};
use std::time::Instant;
use tracing::info;

#[derive(Debug)]
struct InvoiceIssued {
  number: u32,
  total_cents: u64,
}

/// A service the host provides per invocation scope.
#[derive(Debug)]
struct TaxTable {
  rate_percent: u64,
}

#[derive(Debug)]
struct Tax(u64);

#[tokio::main]
async fn main() -> Result<(), HeraldError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Middleware Pipeline Example ---");

  let pipeline = Pipeline::builder("invoice_processing")
    // A wrapper step times everything after it.
    .around("timing", |args: StepArgs, next| async move {
      let started = Instant::now();
      let control = next.run().await?;
      info!("[{}] remaining steps took {:?}", args.step_name(), started.elapsed());
      Ok::<_, anyhow::Error>(control)
    })
    // Small invoices are not processed further.
    .step(
      Step::new("filter_small", |args: StepArgs| async move {
        let invoice = args.get::<InvoiceIssued>()?;
        if invoice.total_cents < 100 {
          info!("Invoice #{} below threshold, stopping.", invoice.number);
          return Ok::<_, anyhow::Error>(PipelineControl::Stop);
        }
        Ok(PipelineControl::Continue)
      })
      .param(Param::<InvoiceIssued>::from_context()),
    )
    .step(
      Step::new("compute_tax", |args: StepArgs| async move {
        let invoice = args.get::<InvoiceIssued>()?;
        let table = args.get::<TaxTable>()?;
        let tax = invoice.total_cents * table.rate_percent / 100;
        args.context().write().insert(Tax(tax));
        Ok::<_, anyhow::Error>(PipelineControl::Continue)
      })
      .param(Param::<InvoiceIssued>::from_context())
      .param(Param::<TaxTable>::from_scope()),
    )
    .step(
      Step::new("report", |args: StepArgs| async move {
        let invoice = args.get::<InvoiceIssued>()?;
        let tax = args.get::<Tax>()?;
        info!("Invoice #{}: total {} cents, tax {} cents", invoice.number, invoice.total_cents, tax.0);
        Ok::<_, anyhow::Error>(PipelineControl::Continue)
      })
      .param(Param::<InvoiceIssued>::from_context())
      .param(Param::<Tax>::from_context()),
    )
    .build()?;

  let services = ServiceCollection::new().singleton(TaxTable { rate_percent: 20 });
  let broker = EventBroker::builder().scope_factory(std::sync::Arc::new(services)).build();
  broker.register(Registration::<InvoiceIssued>::pipeline(pipeline));

  for (number, total_cents) in [(1, 12_500), (2, 40)] {
    let outcomes = broker.publish_and_wait(InvoiceIssued { number, total_cents }).await?;
    info!("Invoice #{} outcomes: {:?}", number, outcomes);
  }

  broker.shutdown_and_wait().await;
  Ok(())
}
