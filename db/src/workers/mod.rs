mod job_run;
mod latest_price;
mod nav_snapshot;
mod order_ledger;
mod paper_trade;
mod session_audit;
