use queue_core::jobs::{AdminApi, JobFilters, JobsRepo, NewJob, SettingsRepo};
use serde_json::Value;
use std::env;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!(
            "queueflowctl <command>\n\
             Commands:\n\
             - reset\n\
             - seed\n\
             - status\n\
             - list [--state=S] [--type=T] [--project=P] [--text=Q] [--limit=N] [--offset=N]\n\
             - get <job_id>\n\
             - enqueue <job_type> <payload_json> [--project=P] [--priority=N] [--max-attempts=N] [--dedupe-key=K]\n\
             - cancel <job_id>\n\
             - retry <job_id>\n\
             - run-now <job_id>\n\
             - force-unlock <job_id>\n\
             - delete <job_id>\n\
             - delete-by-state <state>\n\
             - pause\n\
             - resume\n\
             - concurrency <n>\n\
             \n\
             Uses DATABASE_URL or TEST_DATABASE_URL.\n"
        );
        std::process::exit(2);
    }

    let url = env::var("DATABASE_URL")
        .or_else(|_| env::var("TEST_DATABASE_URL"))
        .expect("DATABASE_URL or TEST_DATABASE_URL must be set");

    let pool = queue_core::db::make_pool(&url).await?;
    let jobs_repo = JobsRepo::new(pool.clone());
    let settings_repo = SettingsRepo::new(pool.clone());
    let admin = AdminApi::new(jobs_repo, settings_repo);

    match args[1].as_str() {
        "reset" => reset(&pool).await?,
        "seed" => seed(&admin).await?,
        "status" => status(&admin).await?,
        "list" => list(&admin, &args[2..]).await?,
        "get" => {
            let id = parse_id(&args, 2, "get <job_id>")?;
            match admin.get_job(id).await? {
                Some(job) => println!("{}", serde_json::to_string_pretty(&job_to_value(&job))?),
                None => println!("job {id} not found"),
            }
        }
        "enqueue" => enqueue(&admin, &args[2..]).await?,
        "cancel" => {
            let id = parse_id(&args, 2, "cancel <job_id>")?;
            let requested = admin.request_cancel(id).await?;
            let cancelled_queued = admin.cancel_queued_job(id).await?;
            println!("cancel_requested={requested} cancelled_while_queued={cancelled_queued}");
        }
        "retry" => {
            let id = parse_id(&args, 2, "retry <job_id>")?;
            match admin.retry_job(id).await? {
                Some(job) => println!("requeued as {}", job.id),
                None => println!("job {id} not found"),
            }
        }
        "run-now" => {
            let id = parse_id(&args, 2, "run-now <job_id>")?;
            println!("updated={}", admin.run_now(id).await?);
        }
        "force-unlock" => {
            let id = parse_id(&args, 2, "force-unlock <job_id>")?;
            println!("updated={}", admin.force_unlock(id).await?);
        }
        "delete" => {
            let id = parse_id(&args, 2, "delete <job_id>")?;
            println!("deleted={}", admin.delete_job(id).await?);
        }
        "delete-by-state" => {
            let state = args.get(2).expect("usage: queueflowctl delete-by-state <state>");
            println!("deleted={}", admin.delete_jobs_by_state(state).await?);
        }
        "pause" => {
            admin.set_paused(true).await?;
            println!("paused");
        }
        "resume" => {
            admin.set_paused(false).await?;
            println!("resumed");
        }
        "concurrency" => {
            let n: i32 = args
                .get(2)
                .and_then(|s| s.parse().ok())
                .expect("usage: queueflowctl concurrency <n>");
            admin.set_concurrency(n).await?;
            println!("concurrency set to {n}");
        }
        other => {
            eprintln!("Unknown command: {other}");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn parse_id(args: &[String], idx: usize, usage: &str) -> anyhow::Result<Uuid> {
    let raw = args.get(idx).unwrap_or_else(|| panic!("usage: queueflowctl {usage}"));
    Ok(raw.parse()?)
}

fn flag(args: &[String], name: &str) -> Option<String> {
    let prefix = format!("--{name}=");
    args.iter().find_map(|a| a.strip_prefix(prefix.as_str()).map(str::to_string))
}

async fn status(admin: &AdminApi) -> anyhow::Result<()> {
    for state in ["queued", "running", "succeeded", "failed", "cancelled"] {
        let filters = JobFilters {
            state: Some(state.to_string()),
            ..Default::default()
        };
        let count = admin.count_jobs(&filters).await?;
        println!("{state}: {count}");
    }
    Ok(())
}

async fn list(admin: &AdminApi, args: &[String]) -> anyhow::Result<()> {
    let args = args.to_vec();
    let filters = JobFilters {
        state: flag(&args, "state"),
        job_type: flag(&args, "type"),
        project_id: flag(&args, "project"),
        text: flag(&args, "text"),
    };
    let limit: i64 = flag(&args, "limit").and_then(|s| s.parse().ok()).unwrap_or(50);
    let offset: i64 = flag(&args, "offset").and_then(|s| s.parse().ok()).unwrap_or(0);

    let jobs = admin.list_jobs(&filters, limit, offset).await?;
    for job in jobs {
        println!(
            "{} | {:<28} | {:<10} | attempts={}/{} | priority={} | project={}",
            job.id,
            job.job_type,
            job.state,
            job.attempts,
            job.max_attempts,
            job.priority,
            job.project_id.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn enqueue(admin: &AdminApi, args: &[String]) -> anyhow::Result<()> {
    let job_type = args.first().expect("usage: queueflowctl enqueue <job_type> <payload_json>");
    let payload_raw = args.get(1).expect("usage: queueflowctl enqueue <job_type> <payload_json>");
    let payload: Value = serde_json::from_str(payload_raw)?;

    let project_id = flag(args, "project");
    let priority: i32 = flag(args, "priority").and_then(|s| s.parse().ok()).unwrap_or(0);
    let max_attempts: i32 = flag(args, "max-attempts").and_then(|s| s.parse().ok()).unwrap_or(3);
    let dedupe_key = flag(args, "dedupe-key");

    let mut job = NewJob::now(job_type, project_id, payload)
        .with_priority(priority)
        .with_max_attempts(max_attempts);
    if let Some(key) = dedupe_key {
        job = job.with_dedupe_key(key);
    }

    let outcome = admin.enqueue(job).await?;
    println!("enqueued {}", outcome.id);
    Ok(())
}

/// Dev convenience: wipes every job row and restores default settings. Meant
/// for pointing at `TEST_DATABASE_URL`, not a live deployment.
async fn reset(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::query("TRUNCATE queue_jobs RESTART IDENTITY CASCADE").execute(pool).await?;
    sqlx::query("UPDATE queue_settings SET paused = false, concurrency = 2").execute(pool).await?;
    println!("reset complete");
    Ok(())
}

/// Dev convenience: enqueues a small, varied batch of jobs so a freshly reset
/// queue has something for `list`/`status` to show.
async fn seed(admin: &AdminApi) -> anyhow::Result<()> {
    admin
        .enqueue_project_create("demo-project", "demo-user", "build me a todo app", None, serde_json::json!([]))
        .await?;
    admin.enqueue_docker_compose_up("demo-project-2", "seed").await?;
    admin.enqueue_docker_wait_ready("demo-project-2").await?;
    println!("seeded 3 jobs");
    Ok(())
}

fn job_to_value(job: &queue_core::jobs::Job) -> Value {
    serde_json::json!({
        "id": job.id,
        "jobType": job.job_type,
        "state": job.state,
        "projectId": job.project_id,
        "payload": job.payload_json,
        "priority": job.priority,
        "attempts": job.attempts,
        "maxAttempts": job.max_attempts,
        "runAt": job.run_at,
        "lockedBy": job.locked_by,
        "lockExpiresAt": job.lock_expires_at,
        "dedupeKey": job.dedupe_key,
        "cancelRequestedAt": job.cancel_requested_at,
        "cancelledAt": job.cancelled_at,
        "lastError": job.last_error,
        "createdAt": job.created_at,
        "updatedAt": job.updated_at,
    })
}
