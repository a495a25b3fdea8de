// Keyboard teleop: WASD drive, R/F gear, Q quit
//
// Holds the control channel for the whole session, so no planned motion
// can interleave with manual driving. Commands go out at ~50Hz; releasing
// the keys (no input for the timeout) zeroes the speeds, and the session
// always ends with a stop.

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use crate::config::MOTOR_MAX;
use crate::control::ControlChannel;
use crate::error::RuntimeError;
use crate::messages::ControlCommand;

const GEARS: [i32; 3] = [MOTOR_MAX / 4, MOTOR_MAX / 2, MOTOR_MAX];
const GEAR_LABELS: [&str; 3] = ["LOW", "MED", "HIGH"];
// Reset speeds after this much time with no movement input.
const INPUT_TIMEOUT: Duration = Duration::from_millis(150);

pub async fn run(mut channel: ControlChannel) -> Result<(), RuntimeError> {
    info!("controls: W/S=drive, A/D=turn, R/F=gear, Q=quit");
    info!("gear: {}", GEAR_LABELS[0]);

    enable_raw_mode()?;
    let result = drive_loop(&mut channel).await;
    disable_raw_mode()?;

    channel.stop().await;
    result
}

async fn drive_loop(channel: &mut ControlChannel) -> Result<(), RuntimeError> {
    let mut gear: usize = 0;

    let mut forward = 0;
    let mut turn = 0;
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for a key with a 20ms timeout (50Hz effective rate).
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Char('w') if pressed => {
                        forward = GEARS[gear];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        forward = -GEARS[gear];
                        last_movement_input = Instant::now();
                    }
                    // Positive turn is to the left.
                    KeyCode::Char('a') if pressed => {
                        turn = GEARS[gear];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        turn = -GEARS[gear];
                        last_movement_input = Instant::now();
                    }

                    KeyCode::Char('r') if pressed => {
                        gear = (gear + 1).min(GEARS.len() - 1);
                        info!("gear: {}", GEAR_LABELS[gear]);
                    }
                    KeyCode::Char('f') if pressed => {
                        gear = gear.saturating_sub(1);
                        info!("gear: {}", GEAR_LABELS[gear]);
                    }

                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if last_movement_input.elapsed() > INPUT_TIMEOUT {
            forward = 0;
            turn = 0;
        }

        channel
            .send(ControlCommand::Motor {
                left: forward - turn,
                right: forward + turn,
            })
            .await;
    }

    Ok(())
}
