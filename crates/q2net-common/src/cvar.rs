// cvar.rs — named tunables read by the parser and predictor

use std::collections::HashMap;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CvarFlags: u8 {
        /// saved to the config file
        const ARCHIVE = 1;
        /// mirrored in the userinfo string
        const USERINFO = 2;
        /// only settable by code, never by the user
        const NOSET = 8;
    }
}

/// A named value, kept as both its string and numeric form.
#[derive(Debug, Clone, PartialEq)]
pub struct Cvar {
    pub name: String,
    pub string: String,
    pub flags: CvarFlags,
    pub modified: bool,
    pub value: f32,
}

#[derive(Debug, Default)]
pub struct CvarContext {
    vars: Vec<Cvar>,
    index: HashMap<String, usize>,
}

impl CvarContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_var(&self, name: &str) -> Option<&Cvar> {
        self.index.get(name).map(|&idx| &self.vars[idx])
    }

    fn find_var_mut(&mut self, name: &str) -> Option<&mut Cvar> {
        match self.index.get(name) {
            Some(&idx) => Some(&mut self.vars[idx]),
            None => None,
        }
    }

    /// Numeric value, 0 when the variable does not exist.
    pub fn value(&self, name: &str) -> f32 {
        self.find_var(name).map_or(0.0, |v| v.value)
    }

    pub fn string(&self, name: &str) -> &str {
        self.find_var(name).map_or("", |v| v.string.as_str())
    }

    /// Creates the variable with `default` unless it already exists, in which
    /// case only the flags are merged in.
    pub fn get(&mut self, name: &str, default: &str, flags: CvarFlags) -> &Cvar {
        if let Some(&idx) = self.index.get(name) {
            self.vars[idx].flags |= flags;
            return &self.vars[idx];
        }

        let idx = self.vars.len();
        self.vars.push(Cvar {
            name: name.to_string(),
            string: default.to_string(),
            flags,
            modified: true,
            value: parse_value(default),
        });
        self.index.insert(name.to_string(), idx);
        &self.vars[idx]
    }

    /// User-level set. Write-protected variables are left alone.
    pub fn set(&mut self, name: &str, value: &str) {
        self.set2(name, value, false);
    }

    /// Code-level set that ignores write protection.
    pub fn force_set(&mut self, name: &str, value: &str) {
        self.set2(name, value, true);
    }

    pub fn set_value(&mut self, name: &str, value: f32) {
        let s = if value == value.trunc() {
            format!("{}", value as i32)
        } else {
            format!("{}", value)
        };
        self.set(name, &s);
    }

    fn set2(&mut self, name: &str, value: &str, force: bool) {
        let Some(&idx) = self.index.get(name) else {
            self.get(name, value, CvarFlags::empty());
            return;
        };
        let var = &mut self.vars[idx];

        if !force && var.flags.contains(CvarFlags::NOSET) {
            log::warn!("{} is write protected.", name);
            return;
        }

        if var.string == value {
            return;
        }

        log::debug!("cvar {} = \"{}\"", name, value);
        var.modified = true;
        var.string = value.to_string();
        var.value = parse_value(value);
    }

    /// Returns and clears the modified flag.
    pub fn take_modified(&mut self, name: &str) -> bool {
        self.find_var_mut(name)
            .map(|v| std::mem::replace(&mut v.modified, false))
            .unwrap_or(false)
    }
}

fn parse_value(s: &str) -> f32 {
    s.trim().parse::<f32>().unwrap_or(0.0)
}
