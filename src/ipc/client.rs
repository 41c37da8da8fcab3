//! The display process's side: replay frames from the game process on the local model.

use std::io::Read;

use crate::{
    progress::{LoadingScreen, ProgressEvent},
    protocol::{self, ProtocolError},
};

/// Reads events until the game process says it's done or goes away, then closes the overlay.
/// A malformed frame ends the loop and is returned.
pub fn run(reader: &mut impl Read, screen: &LoadingScreen) -> Result<(), ProtocolError> {
    let result = replay(reader, screen);

    match &result {
        Ok(()) => log::info!("IPC client exiting cleanly"),
        Err(err) => log::error!("Error in IPC client: {err}"),
    }

    screen.close();
    result
}

fn replay(reader: &mut impl Read, screen: &LoadingScreen) -> Result<(), ProtocolError> {
    while let Some(event) = protocol::decode(reader)? {
        if event == ProgressEvent::Shutdown {
            return Ok(());
        }

        // The game process already validated this, so a rejection means the two models have
        // drifted. The bar stays as it was.
        if let Err(err) = screen.apply(event) {
            log::warn!("Rejected update from game process: {err}");
        }
    }

    log::info!("Game process closed the pipe");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Role,
        host::testing::FakeHost,
        progress::{testing::RecordingSink, CustomOp, DisconnectAction},
    };
    use std::sync::Arc;

    fn client() -> (LoadingScreen, RecordingSink) {
        let screen = LoadingScreen::new(Role::IpcClient, Arc::new(FakeHost::fabric()))
            .with_disconnect_action(DisconnectAction::Teardown);
        let sink = RecordingSink::new();
        assert!(screen.attach(Box::new(sink.clone())));
        (screen, sink)
    }

    fn stream(events: &[ProgressEvent]) -> Vec<u8> {
        events
            .iter()
            .flat_map(|event| protocol::encode(event).unwrap())
            .collect()
    }

    fn sent() -> Vec<ProgressEvent> {
        vec![
            ProgressEvent::SetTitle("Loading Minecraft 1.20.1".to_string()),
            ProgressEvent::BeginEntrypointType {
                name: "main".to_string(),
                type_name: "ModInitializer".to_string(),
                count: 2,
            },
            ProgressEvent::BeginSingleEntrypoint {
                type_name: "main".to_string(),
                type_type: "ModInitializer".to_string(),
                unit_id: "sodium".to_string(),
                unit_name: "Sodium".to_string(),
            },
            ProgressEvent::CreateCustomBar {
                id: "worldgen".to_string(),
                title: "Generating".to_string(),
                max: 10,
            },
            ProgressEvent::CustomBarOp {
                id: "worldgen".to_string(),
                op: CustomOp::Progress(4),
            },
            ProgressEvent::MemoryUsage {
                usage: 512 << 20,
                total: 2048 << 20,
            },
        ]
    }

    #[test]
    fn replays_until_shutdown() {
        let (screen, sink) = client();

        let mut events = sent();
        events.push(ProgressEvent::Shutdown);
        events.push(ProgressEvent::EndEntrypointType {
            name: "main".to_string(),
        });
        let bytes = stream(&events);

        let mut reader = bytes.as_slice();
        run(&mut reader, &screen).unwrap();

        // Everything after the shutdown is left unread.
        assert!(!reader.is_empty());
        assert!(!screen.is_open());
        assert_eq!(screen.title().as_deref(), Some("Loading Minecraft 1.20.1"));

        let mut expected = sent();
        expected.push(ProgressEvent::Shutdown);
        assert_eq!(sink.events(), expected);
        assert_eq!(sink.close_count(), 1);
    }

    #[test]
    fn end_of_stream_closes_too() {
        let (screen, sink) = client();
        let bytes = stream(&sent());

        let mut reader = bytes.as_slice();
        run(&mut reader, &screen).unwrap();

        assert!(!screen.is_open());
        assert_eq!(sink.close_count(), 1);
    }

    #[test]
    fn malformed_frame_is_an_error() {
        let (screen, sink) = client();

        let mut bytes = stream(&sent()[..2]);
        bytes.extend_from_slice(&[42, 0]);

        let mut reader = bytes.as_slice();
        assert!(matches!(
            run(&mut reader, &screen),
            Err(ProtocolError::UnknownMessage(42))
        ));

        assert!(!screen.is_open());
        assert_eq!(sink.events().len(), 3);
    }

    #[test]
    fn rejected_updates_are_skipped() {
        let (screen, _sink) = client();

        let bytes = stream(&[
            ProgressEvent::CreateCustomBar {
                id: "a".to_string(),
                title: "A".to_string(),
                max: 5,
            },
            ProgressEvent::CustomBarOp {
                id: "a".to_string(),
                op: CustomOp::Minimum(9),
            },
            ProgressEvent::CustomBarOp {
                id: "a".to_string(),
                op: CustomOp::Progress(3),
            },
        ]);

        // Stop before the end so the model can still be inspected.
        let mut reader = bytes.as_slice();
        replay(&mut reader, &screen).unwrap();

        let bar = screen.bar("custom:a").unwrap();
        assert_eq!(bar.minimum(), 0);
        assert_eq!(bar.current(), 3);
    }
}
