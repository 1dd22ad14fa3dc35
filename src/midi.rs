//! MIDI input device selection and message delivery.

use std::error::Error;
use std::sync::mpsc::{channel, Receiver, Sender};

use midir::{InitError, MidiInput, MidiInputConnection, MidiInputPort};

use crate::APP_NAME;

/// A MIDI input port as seen by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MidiPortInfo {
    pub id: String,
    pub name: String,
}

pub struct MidiInputs {
    // Keep one input around for listing ports. Connecting consumes a
    // MidiInput, so a new one is created for each connection.
    input: Option<MidiInput>,
    conn: Option<MidiInputConnection<Sender<Vec<u8>>>>,
    rx: Option<Receiver<Vec<u8>>>,
    port_id: Option<String>,
    input_id: u16,
}

impl MidiInputs {
    pub fn new() -> Self {
        let mut m = Self {
            input: None,
            conn: None,
            rx: None,
            port_id: None,
            input_id: 0,
        };
        m.input = match m.new_input() {
            Ok(input) => Some(input),
            Err(e) => {
                log::warn!(target: "midi", "MIDI unavailable: {e}");
                None
            }
        };
        m
    }

    fn new_input(&mut self) -> Result<MidiInput, InitError> {
        self.input_id += 1;
        MidiInput::new(&format!("{} input #{}", APP_NAME, self.input_id))
    }

    /// False if the MIDI subsystem couldn't be opened.
    pub fn is_available(&self) -> bool {
        self.input.is_some()
    }

    pub fn ports(&self) -> Vec<MidiPortInfo> {
        let Some(input) = &self.input else {
            return Vec::new()
        };
        input.ports().iter()
            .map(|p| MidiPortInfo {
                id: p.id(),
                name: input.port_name(p).unwrap_or(String::from("(unknown)")),
            })
            .collect()
    }

    /// ID of the connected port, if any.
    pub fn selected(&self) -> Option<&str> {
        self.port_id.as_deref()
    }

    /// Connect to a port by ID, closing any previous connection.
    pub fn select(&mut self, id: &str) -> Result<(), Box<dyn Error>> {
        let port = self.find_port(id)?;
        let conn = self.connect(&port)?;
        if let Some(old) = self.conn.replace(conn) {
            old.close();
        }
        self.port_id = Some(id.to_owned());
        log::info!(target: "midi", "connected to MIDI input {id}");
        Ok(())
    }

    /// Connect to the first port with a matching name.
    pub fn select_by_name(&mut self, name: &str) -> Result<(), Box<dyn Error>> {
        let port = self.ports().into_iter()
            .find(|p| p.name == name)
            .ok_or("Selected MIDI device not found")?;
        self.select(&port.id)
    }

    pub fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close();
            log::info!(target: "midi", "disconnected MIDI input");
        }
        self.rx = None;
        self.port_id = None;
    }

    /// Drain messages received since the last call.
    pub fn poll(&self) -> Vec<Vec<u8>> {
        match &self.rx {
            Some(rx) => rx.try_iter().collect(),
            None => Vec::new(),
        }
    }

    fn find_port(&self, id: &str) -> Result<MidiInputPort, Box<dyn Error>> {
        let input = self.input.as_ref().ok_or("Could not open MIDI")?;
        input.find_port_by_id(id.to_owned())
            .ok_or_else(|| "Selected MIDI device not found".into())
    }

    fn connect(&mut self, port: &MidiInputPort
    ) -> Result<MidiInputConnection<Sender<Vec<u8>>>, Box<dyn Error>> {
        let mut input = self.new_input()?;
        // ignore SysEx, time, and active sensing
        input.ignore(midir::Ignore::All);
        let (tx, rx) = channel();
        let conn = input.connect(
            port,
            APP_NAME,
            move |_, message, tx| {
                // ignore the error here, it probably just means that the
                // port was switched
                let _ = tx.send(message.to_vec());
            },
            tx,
        )?;
        self.rx = Some(rx);
        Ok(conn)
    }
}

impl Default for MidiInputs {
    fn default() -> Self {
        Self::new()
    }
}
