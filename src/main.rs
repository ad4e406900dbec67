use evalserver_lib::commands::jobs::{failed_jobs, list_jobs, release_job};
use evalserver_lib::models::{Job, JobState};
use std::process::ExitCode;

const USAGE: &str = "usage: evalserver [serve | jobs [state] | failed | release <job_id>]";

fn print_jobs(jobs: &[Job]) {
    for job in jobs {
        let cause = job.failure_cause.map(|c| c.as_str()).unwrap_or("-");
        let perf = job
            .result
            .as_ref()
            .map(|r| format!("{:.4}", r.perf))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}\t{}\t{:?}\tattempt={}\tcause={}\tperf={}",
            job.id, job.job_name, job.state, job.attempt, cause, perf
        );
    }
}

fn dispatch(args: &[String]) -> Result<(), String> {
    match args.first().map(String::as_str) {
        None | Some("serve") => evalserver_lib::run().map_err(|e| e.to_string()),
        Some("jobs") => {
            let state = match args.get(1) {
                Some(raw) => Some(JobState::parse(raw).ok_or_else(|| format!("Unknown state: {}", raw))?),
                None => None,
            };
            print_jobs(&list_jobs(state)?);
            Ok(())
        }
        Some("failed") => {
            print_jobs(&failed_jobs()?);
            Ok(())
        }
        Some("release") => {
            let job_id = args.get(1).ok_or_else(|| USAGE.to_string())?;
            release_job(job_id)?;
            println!("Release of {} queued", job_id);
            Ok(())
        }
        Some(_) => Err(USAGE.to_string()),
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match dispatch(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("evalserver: {}", e);
            ExitCode::FAILURE
        }
    }
}
