mod approval_flow;
mod config_wiring;
mod run_loop;
