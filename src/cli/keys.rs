// src/cli/keys.rs
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::widgets::{ListState, TableState};

use crate::cli::input::LineEdit;
use crate::cli::state::{AddField, App, Collection, ReportField, Screen, Tab};

impl App {
    pub async fn handle_key(&mut self, k: KeyEvent) {
        if k.kind != KeyEventKind::Press { return; }
        if k.modifiers.contains(KeyModifiers::CONTROL) && k.code == KeyCode::Char('c') {
            self.quit = true;
            return;
        }

        match self.screen {
            Screen::Login => self.handle_login_key(k).await,
            Screen::Register => self.handle_register_key(k).await,
            Screen::Main => self.handle_main_key(k).await,
        }
    }

    /// True while a form field is capturing characters.
    pub fn text_input_active(&self) -> bool {
        match self.tab {
            Tab::Categories => self.categories.adding,
            Tab::Transactions => self.add.open,
            Tab::Operations => self.ops.editing.is_some() || self.ops.confirm_delete.is_some(),
            Tab::Reports => self.reports.editing,
            Tab::Help => false,
        }
    }

    async fn handle_login_key(&mut self, k: KeyEvent) {
        match k.code {
            KeyCode::Esc => self.quit = true,
            KeyCode::F(2) => {
                self.login.error = None;
                self.screen = Screen::Register;
            }
            KeyCode::Tab | KeyCode::Down | KeyCode::BackTab | KeyCode::Up => {
                self.login.focus = (self.login.focus + 1) % 2;
            }
            KeyCode::Enter => self.submit_login().await,
            _ => {
                let field = if self.login.focus == 0 { &mut self.login.username } else { &mut self.login.password };
                edit_field(field, k.code);
            }
        }
    }

    async fn handle_register_key(&mut self, k: KeyEvent) {
        match k.code {
            KeyCode::Esc | KeyCode::F(2) => {
                self.register.error = None;
                self.screen = Screen::Login;
            }
            KeyCode::Tab | KeyCode::Down => {
                self.register.focus = (self.register.focus + 1) % 3;
            }
            KeyCode::BackTab | KeyCode::Up => {
                self.register.focus = (self.register.focus + 2) % 3;
            }
            KeyCode::Enter => self.submit_register().await,
            _ => {
                let field = match self.register.focus {
                    0 => &mut self.register.username,
                    1 => &mut self.register.password,
                    _ => &mut self.register.confirm,
                };
                edit_field(field, k.code);
            }
        }
    }

    async fn handle_main_key(&mut self, k: KeyEvent) {
        if !self.text_input_active() {
            match k.code {
                KeyCode::Char('q') => {
                    self.quit = true;
                    return;
                }
                KeyCode::Tab => {
                    self.tab = self.tab.next();
                    return;
                }
                KeyCode::Char(c @ '1'..='5') => {
                    let idx = c as usize - '1' as usize;
                    self.tab = Tab::ALL[idx];
                    return;
                }
                KeyCode::Char('?') => {
                    self.tab = Tab::Help;
                    return;
                }
                KeyCode::Char('T') => {
                    self.theme = self.theme.toggled();
                    return;
                }
                KeyCode::Char('o') => {
                    self.logout();
                    return;
                }
                _ => {}
            }
        }

        match self.tab {
            Tab::Categories => self.handle_categories_key(k).await,
            Tab::Transactions => self.handle_txn_key(k).await,
            Tab::Operations => self.handle_ops_key(k).await,
            Tab::Reports => self.handle_reports_key(k).await,
            Tab::Help => {
                if matches!(k.code, KeyCode::Esc | KeyCode::Char('b')) {
                    self.tab = Tab::Categories;
                }
            }
        }
    }

    async fn handle_categories_key(&mut self, k: KeyEvent) {
        if self.categories.adding {
            match k.code {
                KeyCode::Enter => self.add_category().await,
                KeyCode::Esc => {
                    self.categories.adding = false;
                    self.categories.name.clear();
                }
                code => edit_field(&mut self.categories.name, code),
            }
            return;
        }

        match k.code {
            KeyCode::Up => move_list(&mut self.categories.sel, self.categories.list.len(), -1),
            KeyCode::Down => move_list(&mut self.categories.sel, self.categories.list.len(), 1),
            KeyCode::Char('n') => self.categories.adding = true,
            KeyCode::Char('x') | KeyCode::Delete => {
                if let Some(id) = self.selected_category().map(|c| c.id.clone()) {
                    self.delete_category(&id).await;
                }
            }
            KeyCode::Char('r') => self.refresh(Collection::Categories).await,
            _ => {}
        }
    }

    async fn handle_txn_key(&mut self, k: KeyEvent) {
        if self.add.open {
            match k.code {
                KeyCode::Esc => {
                    self.add.open = false;
                    self.add.error = None;
                }
                KeyCode::Enter => self.submit_txn().await,
                KeyCode::Tab | KeyCode::BackTab => {
                    self.add.focus = match self.add.focus {
                        AddField::Category => AddField::Amount,
                        AddField::Amount => AddField::Category,
                    };
                }
                KeyCode::Char('t') => self.add.kind = self.add.kind.toggled(),
                KeyCode::Up if self.add.focus == AddField::Category => {
                    move_list(&mut self.add.cat_sel, self.categories.list.len(), -1)
                }
                KeyCode::Down if self.add.focus == AddField::Category => {
                    move_list(&mut self.add.cat_sel, self.categories.list.len(), 1)
                }
                code if self.add.focus == AddField::Amount => {
                    if accepts_amount(code) {
                        edit_field(&mut self.add.amount, code);
                    }
                }
                _ => {}
            }
            return;
        }

        match k.code {
            KeyCode::Up => move_table(&mut self.txn.tsel, self.txn.table.len(), -1),
            KeyCode::Down => move_table(&mut self.txn.tsel, self.txn.table.len(), 1),
            KeyCode::Char('a') => {
                self.add.open = true;
                self.add.error = None;
                self.add.focus = AddField::Category;
                if self.add.cat_sel.selected().is_none() && !self.categories.list.is_empty() {
                    self.add.cat_sel.select(Some(0));
                }
            }
            KeyCode::Char('x') | KeyCode::Delete => {
                if let Some(id) = self.selected_txn().map(|t| t.id.clone()) {
                    self.delete_transaction(&id).await;
                }
            }
            KeyCode::Char('r') => self.refresh(Collection::Transactions).await,
            _ => {}
        }
    }

    async fn handle_ops_key(&mut self, k: KeyEvent) {
        if let Some(id) = self.ops.confirm_delete.clone() {
            match k.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => {
                    self.ops.confirm_delete = None;
                    self.delete_operation(&id).await;
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    self.ops.confirm_delete = None;
                }
                _ => {}
            }
            return;
        }

        if let Some((id, field)) = self.ops.editing.as_mut() {
            match k.code {
                KeyCode::Enter => {
                    let (id, amount) = (id.clone(), field.value.clone());
                    self.ops.editing = None;
                    self.edit_operation(&id, &amount).await;
                }
                KeyCode::Esc => self.ops.editing = None,
                code if accepts_amount(code) => edit_field(field, code),
                _ => {}
            }
            return;
        }

        match k.code {
            KeyCode::Up => move_table(&mut self.ops.tsel, self.ops.table.len(), -1),
            KeyCode::Down => move_table(&mut self.ops.tsel, self.ops.table.len(), 1),
            KeyCode::Char('e') | KeyCode::Enter => {
                if let Some(id) = self.selected_operation().map(|o| o.id.clone()) {
                    self.ops.editing = Some((id, LineEdit::default()));
                }
            }
            KeyCode::Char('x') | KeyCode::Delete => {
                self.ops.confirm_delete = self.selected_operation().map(|o| o.id.clone());
            }
            KeyCode::Char('r') => self.refresh(Collection::Operations).await,
            _ => {}
        }
    }

    async fn handle_reports_key(&mut self, k: KeyEvent) {
        if self.reports.editing {
            match k.code {
                KeyCode::Enter => {
                    self.reports.editing = false;
                    self.generate_report().await;
                }
                KeyCode::Esc => self.reports.editing = false,
                KeyCode::Tab | KeyCode::BackTab => {
                    self.reports.focus = match self.reports.focus {
                        ReportField::Start => ReportField::End,
                        ReportField::End => ReportField::Start,
                    };
                }
                code => {
                    let field = match self.reports.focus {
                        ReportField::Start => &mut self.reports.start,
                        ReportField::End => &mut self.reports.end,
                    };
                    edit_field(field, code);
                }
            }
            return;
        }

        match k.code {
            KeyCode::Char('s') => {
                self.reports.focus = ReportField::Start;
                self.reports.editing = true;
            }
            KeyCode::Char('e') => {
                self.reports.focus = ReportField::End;
                self.reports.editing = true;
            }
            KeyCode::Enter | KeyCode::Char('g') => self.generate_report().await,
            _ => {}
        }
    }
}

fn edit_field(field: &mut LineEdit, code: KeyCode) {
    match code {
        KeyCode::Char(c) => field.push(c),
        KeyCode::Backspace => field.backspace(),
        KeyCode::Delete => field.delete(),
        KeyCode::Left => field.left(),
        KeyCode::Right => field.right(),
        KeyCode::Home => field.cursor = 0,
        KeyCode::End => field.cursor = field.value.chars().count(),
        _ => {}
    }
}

fn accepts_amount(code: KeyCode) -> bool {
    match code {
        KeyCode::Char(c) => c.is_ascii_digit() || c == '.' || c == '-',
        _ => true,
    }
}

fn move_list(sel: &mut ListState, len: usize, delta: isize) {
    if len == 0 { sel.select(None); return; }
    let cur = sel.selected().unwrap_or(0) as isize;
    sel.select(Some((cur + delta).rem_euclid(len as isize) as usize));
}

fn move_table(sel: &mut TableState, len: usize, delta: isize) {
    if len == 0 { sel.select(None); return; }
    let cur = sel.selected().unwrap_or(0) as isize;
    sel.select(Some((cur + delta).rem_euclid(len as isize) as usize));
}
