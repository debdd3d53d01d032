#![deny(
    warnings,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo
)]
#![allow(clippy::multiple_crate_versions)]

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use songpulse::cli::{self, Cmd};
use songpulse::config::{Backend, DbTarget};
use songpulse::store::{Database, WorkoutStore};
use songpulse::types::{
    AnalyzeOutcome, AnalyzedPlay, NewSong, ScoreKind, WorkoutDetails, WorkoutSession,
};
use songpulse::{analyze, ingest, release_analysis, session, top_songs, utils};

#[macro_use]
extern crate songpulse;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    utils::init_logging(cli.verbose, cli.quiet);

    let target = DbTarget::parse(&cli.db);
    dlog!("db_target={target:?}");

    match Backend::open(&target)? {
        Backend::Postgres(mut db) => run(&mut db, cli.cmd),
        Backend::Sqlite(mut db) => run(&mut db, cli.cmd),
    }
}

fn when(at: Option<&str>) -> Result<DateTime<Utc>> {
    at.map_or_else(|| Ok(Utc::now()), utils::parse_rfc3339)
}

fn run<D: Database>(db: &mut D, cmd: Cmd) -> Result<()> {
    match cmd {
        Cmd::Ingest { file, analyze } => {
            let workout_id = ingest::ingest_file(db, &file)?;
            println!("{workout_id}");
            if analyze {
                report(&songpulse::analyze(db, workout_id)?, false)?;
            }
        }
        Cmd::Analyze { workout_id, json } => {
            report(&analyze(db, workout_id)?, json)?;
        }
        Cmd::Release { workout_id } => {
            let workout = release_analysis(db, workout_id)?;
            println!("{}\t{}", workout.id, workout.status);
        }
        Cmd::Top {
            user,
            kind,
            limit,
            json,
        } => {
            let stats = top_songs(db, user, kind, limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }

            let mut tx = db.begin()?;
            for (i, stat) in stats.iter().enumerate() {
                let title = tx.song(stat.song_id)?.map_or_else(
                    || format!("song {}", stat.song_id),
                    |s| format!("{} - {}", s.artist, s.title),
                );
                println!(
                    "{}\t{:.2}\t{}\t{title}",
                    i + 1,
                    kind.of_stat(stat),
                    stat.times_played
                );
            }
        }
        Cmd::Start { user, workout_type } => {
            let workout = session::start_workout(db, user, workout_type, Utc::now())?;
            println!("{}", workout.id);
        }
        Cmd::Transition {
            workout_id,
            workout_type,
        } => {
            let workout = session::transition_workout(db, workout_id, &workout_type)?;
            print_workout(&workout);
        }
        Cmd::Active { user, json } => {
            let workout = session::active_workout(db, user)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&workout)?);
            } else if let Some(w) = workout {
                print_workout(&w);
            } else {
                println!("no active workout");
            }
        }
        Cmd::History { user, limit, json } => {
            let workouts = session::workout_history(db, user, limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&workouts)?);
            } else {
                workouts.iter().for_each(print_workout);
            }
        }
        Cmd::Show { workout_id, json } => {
            let details = session::workout_details(db, workout_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&details)?);
            } else {
                print_details(&details);
            }
        }
        Cmd::Hr {
            workout_id,
            bpm,
            at,
        } => {
            session::log_heart_rate(db, workout_id, bpm, when(at.as_deref())?)?;
        }
        Cmd::Song {
            workout_id,
            spotify_id,
            title,
            artist,
            at,
        } => {
            let song = NewSong {
                spotify_id,
                title,
                artist,
            };
            let play = session::log_song_play(db, workout_id, &song, when(at.as_deref())?)?;
            println!("{}", play.id);
        }
        Cmd::StopSong { play_id, at } => {
            session::stop_song_play(db, play_id, when(at.as_deref())?)?;
        }
        Cmd::End { workout_id, at } => {
            let workout = session::end_workout(db, workout_id, when(at.as_deref())?)?;
            print_workout(&workout);
        }
    }

    Ok(())
}

fn print_workout(w: &WorkoutSession) {
    let dur_str = w
        .duration()
        .map_or_else(|| "unknown".to_string(), utils::format_duration);
    println!(
        "{}\t{}\t{}\t{}\t{dur_str}",
        w.id,
        w.status,
        w.start.to_rfc3339(),
        w.workout_type.as_deref().unwrap_or("-")
    );
}

fn print_details(d: &WorkoutDetails) {
    print_workout(&d.workout);
    for s in &d.heart_rate_data {
        println!("hr\t{}\t{}", s.timestamp.to_rfc3339(), s.bpm);
    }
    for p in &d.song_plays {
        let end = p
            .end
            .as_ref()
            .map_or_else(|| "open".to_string(), DateTime::to_rfc3339);
        let effect = p.analysis.map_or_else(
            || "-".to_string(),
            |a| format!("{:+.1}\t{}", a.bpm_change, a.position),
        );
        println!(
            "song\t{}\t{}\t{}\t{end}\t{effect}",
            p.id,
            p.song_id,
            p.start.to_rfc3339()
        );
    }
}

fn report(outcome: &AnalyzeOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    match outcome {
        AnalyzeOutcome::NothingToAnalyze { reason } => println!("nothing to analyze: {reason}"),
        AnalyzeOutcome::Analyzed(r) => {
            let baseline = r
                .baseline_bpm
                .map_or_else(|| "none".to_string(), |b| format!("{b:.1}"));
            println!(
                "workout {}\tbaseline {baseline}\tsongs analyzed {}",
                r.workout_id, r.songs_analyzed
            );
            print_ranked(ScoreKind::Hype, &r.top_hype_songs);
            print_ranked(ScoreKind::Cooldown, &r.top_cooldown_songs);
        }
    }
    Ok(())
}

fn print_ranked(kind: ScoreKind, plays: &[AnalyzedPlay]) {
    let label = match kind {
        ScoreKind::Hype => "hype",
        ScoreKind::Cooldown => "cooldown",
    };
    for (i, p) in plays.iter().enumerate() {
        let title = p.song.as_ref().map_or_else(
            || format!("song play {}", p.song_play_id),
            |s| format!("{} - {}", s.artist, s.title),
        );
        println!(
            "{label}\t{}\t{:.2}\t{:+.1}\t{}\t{title}",
            i + 1,
            kind.of_analysis(&p.analysis),
            p.analysis.bpm_change,
            p.analysis.position
        );
    }
}
